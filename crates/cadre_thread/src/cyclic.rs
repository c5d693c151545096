//! Fixed-period cyclic execution on a dedicated thread.

use cadre_log::{error, trace};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// A dedicated thread invoking a callable repeatedly, enforcing a minimum
/// period between consecutive invocations.
///
/// The scheduler does not catch up: if an invocation runs longer than one
/// period, the missed ticks are skipped, not queued. A zero period removes
/// the timing gate entirely, so the callable runs in a tight loop.
///
/// The executor is scope-bound: dropping it stops the loop and joins the
/// thread, letting an in-flight invocation finish first.
///
/// # Examples
/// ```
/// # use cadre_thread::{CyclicExecutor, hertz};
/// # use std::sync::{
/// #     Arc,
/// #     atomic::{AtomicUsize, Ordering},
/// # };
/// # use std::{thread, time::Duration};
/// #
/// let ticks = Arc::new(AtomicUsize::new(0));
///
/// let executor = CyclicExecutor::spawn(hertz(100.0), {
///     let ticks = Arc::clone(&ticks);
///     move || {
///         ticks.fetch_add(1, Ordering::Relaxed);
///     }
/// });
///
/// thread::sleep(Duration::from_millis(50));
/// drop(executor);
///
/// assert!(ticks.load(Ordering::Relaxed) > 0);
/// ```
#[derive(Debug)]
pub struct CyclicExecutor {
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CyclicExecutor {
    /// Spawns a thread that keeps invoking `work`, leaving at least
    /// `period` between the starts of consecutive invocations (measured
    /// on the monotonic clock).
    pub fn spawn<F>(period: Duration, work: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));

        let thread = thread::Builder::new()
            .name("cadre-cyclic".to_string())
            .spawn({
                let alive = Arc::clone(&alive);
                move || cycle(&alive, period, work)
            })
            .expect("failed to spawn cyclic executor thread");

        Self {
            alive,
            thread: Some(thread),
        }
    }
}

impl Drop for CyclicExecutor {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Cyclic thread failed to join");
            }
            trace!("Cyclic thread joined");
        }
    }
}

fn cycle<F>(alive: &AtomicBool, period: Duration, mut work: F)
where
    F: FnMut(),
{
    trace!("Cyclic thread spawned");

    if period.is_zero() {
        while alive.load(Ordering::Acquire) {
            work();
        }
        return;
    }

    // The first invocation is immediate; afterwards a tick fires only
    // once a full period has passed since the previous tick started.
    let mut last: Option<Instant> = None;

    while alive.load(Ordering::Acquire) {
        let now = Instant::now();
        if last.is_none_or(|last| now - last >= period) {
            last = Some(now);
            work();
        }
    }
}

/// The period of a cycle repeating at the given rate in millihertz.
pub fn millihertz(frequency: f64) -> Duration {
    Duration::from_nanos((1.0e12 / frequency) as u64)
}

/// The period of a cycle repeating at the given rate in hertz.
pub fn hertz(frequency: f64) -> Duration {
    Duration::from_nanos((1.0e9 / frequency) as u64)
}

/// The period of a cycle repeating at the given rate in kilohertz.
pub fn kilohertz(frequency: f64) -> Duration {
    Duration::from_nanos((1.0e6 / frequency) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn frequencies_convert_to_periods() {
        assert_eq!(millihertz(500.0), Duration::from_secs(2));
        assert_eq!(hertz(20.0), Duration::from_millis(50));
        assert_eq!(kilohertz(1.0), Duration::from_millis(1));
    }

    #[test]
    fn ticks_are_separated_by_at_least_one_period() {
        let ticks = Arc::new(AtomicUsize::new(0));

        let executor = CyclicExecutor::spawn(Duration::from_millis(50), {
            let ticks = Arc::clone(&ticks);
            move || {
                ticks.fetch_add(1, Ordering::Relaxed);
            }
        });

        thread::sleep(Duration::from_millis(510));
        drop(executor);

        // Ticks at 0, 50, ..., 500 ms, with one tick of jitter tolerated
        // either way
        let ticks = ticks.load(Ordering::Relaxed);
        assert!((9..=11).contains(&ticks), "observed {ticks} ticks");
    }

    #[test]
    fn zero_period_runs_in_a_tight_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));

        let executor = CyclicExecutor::spawn(Duration::ZERO, {
            let ticks = Arc::clone(&ticks);
            move || {
                ticks.fetch_add(1, Ordering::Relaxed);
            }
        });

        thread::sleep(Duration::from_millis(20));
        drop(executor);

        assert!(ticks.load(Ordering::Relaxed) > 100);
    }

    #[test]
    fn overlong_invocations_skip_ticks_instead_of_queueing_them() {
        let ticks = Arc::new(AtomicUsize::new(0));

        // Each invocation spans several 10 ms periods
        let executor = CyclicExecutor::spawn(Duration::from_millis(10), {
            let ticks = Arc::clone(&ticks);
            move || {
                ticks.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(45));
            }
        });

        thread::sleep(Duration::from_millis(200));
        drop(executor);

        // With catch-up this would approach 20 ticks; without it, roughly
        // one tick per 45 ms invocation fits in the window
        assert!(ticks.load(Ordering::Relaxed) <= 6);
    }

    #[test]
    fn dropping_the_executor_lets_the_current_invocation_finish() {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let executor = CyclicExecutor::spawn(Duration::from_millis(1), {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            move || {
                started.store(true, Ordering::Release);
                thread::sleep(Duration::from_millis(30));
                finished.store(true, Ordering::Release);
            }
        });

        // Tear down while an invocation is underway
        while !started.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        drop(executor);

        assert!(finished.load(Ordering::Acquire));
    }
}
