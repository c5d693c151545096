//! Scoped execution and parallel loops on top of the thread pool.

use crate::{pool::ThreadPool, queue::Task};
use std::{mem, ops::Range};

/// A boxed task that may borrow values with lifetime `'t`. Tasks enqueued
/// directly on a [`ThreadPool`] must have the static lifetime, but shorter
/// lifetimes are allowed for tasks executed through a [`Scope`].
#[allow(missing_debug_implementations)]
pub struct ScopedTask<'t>(Box<dyn FnOnce() + Send + 't>);

/// A scope of execution for a [`ThreadPool`], obtainable by calling
/// [`ThreadPool::scope`]. Tasks executed through the scope can have any
/// lifetime longer than that of the scope.
#[allow(missing_debug_implementations)]
pub struct Scope<'s> {
    pool: &'s ThreadPool,
}

impl<'t> ScopedTask<'t> {
    /// Creates a new scoped task represented by the given closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 't,
    {
        Self(Box::new(f))
    }
}

impl<'s> Scope<'s> {
    /// Enqueues the given tasks as one contiguous batch: the whole batch
    /// goes into the queue under a single lock acquisition, with no other
    /// submission interleaved. Returns as soon as the tasks are queued;
    /// the quiescence wait happens when the scope ends.
    pub fn execute<'t, I>(&self, tasks: I)
    where
        I: IntoIterator<Item = ScopedTask<'t>>,
        't: 's,
    {
        self.pool.core().queue.push_batch(tasks.into_iter().map(|task| {
            // SAFETY: The lifetime constraint on this method ensures that
            // values borrowed by the task outlive the scope. The only way
            // to obtain a `Scope` is through `ThreadPool::scope`, which
            // blocks until the pool is idle before the scope's lifetime
            // ends, so by then every task here has been executed. An
            // executed task is not retained anywhere: the queue hands it
            // to a worker slot, which consumes it. No captured borrow is
            // therefore dereferenced after the scope ends.
            let task = unsafe { mem::transmute::<ScopedTask<'t>, ScopedTask<'static>>(task) };
            let boxed: Task = task.0;
            boxed
        }));
    }
}

impl ThreadPool {
    /// Calls the given closure with a scope that can be used for executing
    /// tasks that borrow values with non-static lifetimes, as long as the
    /// borrows outlive the scope.
    ///
    /// Once the closure returns, the calling thread is blocked until the
    /// pool has gone idle; the wait also happens if the closure panics.
    /// Dispatching must not stay [paused](Self::pause) while scoped tasks
    /// are pending, or the wait never finishes.
    ///
    /// # Examples
    /// ```
    /// # use cadre_thread::{ScopedTask, ThreadPool};
    /// #
    /// let pool = ThreadPool::with_workers(2);
    ///
    /// let mut data = vec![0, 0, 0, 0];
    ///
    /// pool.scope(|scope| {
    ///     // The tasks borrow from the local `data` variable,
    ///     // which is okay because it outlives the scope
    ///     scope.execute(data.iter_mut().map(|value| {
    ///         ScopedTask::new(|| {
    ///             *value += 1;
    ///         })
    ///     }));
    /// });
    ///
    /// // All values have been incremented
    /// assert_eq!(data, vec![1, 1, 1, 1]);
    /// ```
    ///
    /// # Returns
    /// The return value of the closure.
    pub fn scope<'p, 's, F, R>(&'p self, f: F) -> R
    where
        F: FnOnce(Scope<'s>) -> R,
        'p: 's,
    {
        // Guard that waits for the pool to go idle when dropped, ensuring
        // that we always wait even if `f` panics.
        struct ScopeGuard<'a>(&'a ThreadPool);

        impl Drop for ScopeGuard<'_> {
            fn drop(&mut self) {
                self.0.core().wait_until_idle();
            }
        }

        let _guard = ScopeGuard(self);

        f(Scope { pool: self })
    }

    /// Invokes `body` with every index in `indices`, spread across the
    /// pool's workers, and returns once every invocation has completed.
    ///
    /// The per-index tasks are enqueued as one contiguous batch. An empty
    /// range completes immediately without invoking the body. The body
    /// must be safe to invoke concurrently; no synchronization is added
    /// around it. A panicking invocation is logged and swallowed by its
    /// worker, and the loop still runs to completion.
    ///
    /// # Examples
    /// ```
    /// # use cadre_thread::ThreadPool;
    /// # use std::sync::atomic::{AtomicBool, Ordering};
    /// #
    /// let pool = ThreadPool::with_workers(4);
    ///
    /// let flags: Vec<_> = (0..10).map(|_| AtomicBool::new(false)).collect();
    ///
    /// pool.for_each_index(0..10, |idx| {
    ///     flags[idx].store(true, Ordering::Relaxed);
    /// });
    ///
    /// assert!(flags.iter().all(|flag| flag.load(Ordering::Relaxed)));
    /// ```
    pub fn for_each_index<F>(&self, indices: Range<usize>, body: F)
    where
        F: Fn(usize) + Sync,
    {
        self.scope(|scope| {
            let body = &body;
            scope.execute(indices.map(|index| ScopedTask::new(move || body(index))));
        });
    }

    /// Invokes `body` with every element yielded by `items`, spread across
    /// the pool's workers, and returns once every invocation has
    /// completed.
    ///
    /// The decomposition is a one-time snapshot: the iterator is consumed
    /// up front and each task owns the element it was created with, which
    /// may itself be a (mutable) reference into caller state. The same
    /// batching, empty-input and concurrency rules as for
    /// [`for_each_index`](Self::for_each_index) apply.
    ///
    /// # Examples
    /// ```
    /// # use cadre_thread::ThreadPool;
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// #
    /// let pool = ThreadPool::with_workers(2);
    ///
    /// let values = [10, 20, 30, 40];
    /// let sum = AtomicUsize::new(0);
    ///
    /// pool.for_each(&values, |value| {
    ///     sum.fetch_add(*value, Ordering::Relaxed);
    /// });
    ///
    /// assert_eq!(sum.load(Ordering::Relaxed), 100);
    /// ```
    pub fn for_each<I, F>(&self, items: I, body: F)
    where
        I: IntoIterator,
        I::Item: Send,
        F: Fn(I::Item) + Sync,
    {
        self.scope(|scope| {
            let body = &body;
            scope.execute(
                items
                    .into_iter()
                    .map(|item| ScopedTask::new(move || body(item))),
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::{
        iter,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    #[test]
    fn every_index_in_the_range_is_visited() {
        let pool = ThreadPool::with_workers(4);
        let flags: Vec<_> = (0..10).map(|_| AtomicBool::new(false)).collect();

        pool.for_each_index(0..10, |index| {
            flags[index].store(true, Ordering::Relaxed);
        });

        assert!(flags.iter().all(|flag| flag.load(Ordering::Relaxed)));
    }

    #[test]
    fn offset_ranges_visit_only_their_indices() {
        let pool = ThreadPool::with_workers(2);
        let visited = Mutex::new(Vec::new());

        pool.for_each_index(3..7, |index| {
            visited.lock().push(index);
        });

        let mut visited = visited.into_inner();
        visited.sort_unstable();
        assert_eq!(visited, [3, 4, 5, 6]);
    }

    #[test]
    fn empty_range_completes_without_invoking_the_body() {
        let pool = ThreadPool::with_workers(2);
        let invoked = AtomicBool::new(false);

        pool.for_each_index(5..5, |_| {
            invoked.store(true, Ordering::Relaxed);
        });

        assert!(!invoked.load(Ordering::Relaxed));
    }

    #[test]
    fn elements_of_an_iterable_are_each_processed_once() {
        let pool = ThreadPool::with_workers(2);
        let values = [10_usize, 20, 30, 40];
        let sum = AtomicUsize::new(0);

        pool.for_each(&values, |value| {
            sum.fetch_add(*value, Ordering::Relaxed);
        });

        assert_eq!(sum.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn empty_iterable_completes_without_invoking_the_body() {
        let pool = ThreadPool::with_workers(2);
        let invoked = AtomicBool::new(false);

        pool.for_each(Vec::<usize>::new(), |_| {
            invoked.store(true, Ordering::Relaxed);
        });

        assert!(!invoked.load(Ordering::Relaxed));
    }

    #[test]
    fn elements_can_be_mutated_through_the_loop_body() {
        let pool = ThreadPool::with_workers(2);
        let mut data = vec![0, 0, 0, 0];

        pool.for_each(data.iter_mut(), |value| {
            *value += 1;
        });

        assert_eq!(data, vec![1, 1, 1, 1]);
    }

    #[test]
    fn scoped_execution_with_borrowed_data_works() {
        let pool = ThreadPool::with_workers(2);
        let mut data = vec![0, 0, 0, 0];

        pool.scope(|scope| {
            scope.execute(data.iter_mut().map(|value| {
                ScopedTask::new(|| {
                    *value += 1;
                })
            }));
        });

        assert_eq!(data, vec![1, 1, 1, 1]);
    }

    #[test]
    fn scope_returns_the_closure_result() {
        let pool = ThreadPool::with_workers(1);
        let doubled = pool.scope(|_| 21 * 2);
        assert_eq!(doubled, 42);
    }

    #[test]
    fn scoped_task_can_submit_nested_tasks() {
        let pool = ThreadPool::with_workers(2);
        let count = Arc::new(AtomicUsize::new(0));

        let pool_ref = &pool;
        let count_ref = &count;

        pool.scope(|scope| {
            scope.execute(iter::once(ScopedTask::new(move || {
                count_ref.fetch_add(1, Ordering::Relaxed);

                // Spawn another task from within a task; the scope's wait
                // drains it as well
                let count = Arc::clone(count_ref);
                pool_ref.execute(move || {
                    count.fetch_add(1, Ordering::Relaxed);
                });
            })));
        });

        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
