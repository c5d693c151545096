//! Macros for logging spans of work.

/// Evaluates an expression between a pair of trace lines, the second of
/// which reports how long the evaluation took. The label may contain
/// format placeholders filled by the arguments before the semicolon.
///
/// # Examples
/// ```
/// # use cadre_log::with_trace_timing;
/// #
/// let doubled = with_trace_timing!("Doubling {}", 21; 21 * 2);
/// assert_eq!(doubled, 42);
/// ```
#[macro_export]
macro_rules! with_trace_timing {
    ($label:expr $(,$arg:expr)*; $body:expr) => {{
        $crate::trace!(concat!("Begin: ", $label)$(,$arg)*);
        let _begin = ::std::time::Instant::now();
        let _value = $body;
        $crate::trace!(
            concat!("({:.2} ms) Done: ", $label),
            _begin.elapsed().as_secs_f64() * 1e3
            $(,$arg)*
        );
        _value
    }};
}
