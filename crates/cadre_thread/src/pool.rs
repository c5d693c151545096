//! Thread pool with a dedicated dispatcher moving queued tasks to idle
//! workers.

use crate::{
    channel::{TaskHandle, completion_channel},
    queue::TaskQueue,
    worker::Worker,
};
use cadre_log::{debug, error, trace, warn};
use parking_lot::RwLock;
use std::{
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Interval between polls of the queue and the worker flags while waiting
/// for quiescence.
const POLL_INTERVAL: Duration = Duration::from_nanos(1);

/// A set of worker threads executing heterogeneous tasks handed off by a
/// dedicated dispatcher thread.
///
/// Tasks are enqueued with [`execute`](Self::execute) (fire-and-forget) or
/// [`submit`](Self::submit) (returns a [`TaskHandle`] carrying the result).
/// The dispatcher continuously scans the workers and hands the queue head
/// to the first idle one, so tasks start in submission order.
///
/// # Examples
/// ```
/// # use cadre_thread::ThreadPool;
/// # use std::sync::{
/// #     Arc,
/// #     atomic::{AtomicUsize, Ordering},
/// # };
/// #
/// let pool = ThreadPool::with_workers(2);
///
/// // Fire-and-forget tasks synchronize through shared state
/// let count = Arc::new(AtomicUsize::new(0));
/// for _ in 0..4 {
///     let count = Arc::clone(&count);
///     pool.execute(move || {
///         count.fetch_add(1, Ordering::Relaxed);
///     });
/// }
///
/// // Tracked tasks deliver their result through a handle
/// let handle = pool.submit(|| 6 * 7);
///
/// pool.wait();
/// assert_eq!(count.load(Ordering::Relaxed), 4);
/// assert_eq!(handle.wait(), 42);
/// ```
#[derive(Debug)]
pub struct ThreadPool {
    core: Arc<PoolCore>,
    dispatcher: Option<JoinHandle<()>>,
}

/// State shared between the pool handle, the dispatcher thread and scoped
/// executions.
#[derive(Debug)]
pub(crate) struct PoolCore {
    pub(crate) queue: TaskQueue,
    workers: RwLock<Vec<Worker>>,
    /// Dispatcher loop control; cleared once, at teardown.
    alive: AtomicBool,
    /// Pause gate: while clear, the dispatcher assigns nothing.
    active: AtomicBool,
}

impl ThreadPool {
    /// Creates a pool with one worker per unit of available parallelism.
    pub fn new() -> Self {
        Self::with_workers(0)
    }

    /// Creates a pool with the given number of worker threads.
    ///
    /// A `count` of zero or less is interpreted as an offset from the
    /// available parallelism, clamped to a minimum of one worker. A request
    /// leaving fewer than two units of parallelism for the dispatcher and
    /// the caller is honored, with an advisory warning.
    pub fn with_workers(count: isize) -> Self {
        let count = resolved_worker_count(count);

        let core = Arc::new(PoolCore {
            queue: TaskQueue::default(),
            workers: RwLock::new(spawn_workers(count)),
            alive: AtomicBool::new(true),
            active: AtomicBool::new(true),
        });

        let dispatcher = thread::Builder::new()
            .name("cadre-dispatch".to_string())
            .spawn({
                let core = Arc::clone(&core);
                move || core.dispatch_loop()
            })
            .expect("failed to spawn dispatcher thread");

        debug!("Acquired {count} worker thread{}", plural_suffix(count));

        Self {
            core,
            dispatcher: Some(dispatcher),
        }
    }

    /// Enqueues a task and returns a handle that becomes ready once the
    /// task has run to completion.
    ///
    /// A panic in the task is captured and resumed on the thread that
    /// consumes the handle. Unit-returning closures get a handle too, so
    /// callers can synchronize on their completion.
    pub fn submit<R, F>(&self, task: F) -> TaskHandle<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (sender, handle) = completion_channel();
        self.core.queue.push(Box::new(move || {
            sender.fulfill(panic::catch_unwind(AssertUnwindSafe(task)));
        }));
        trace!("Enqueued a tracked task");
        handle
    }

    /// Enqueues a task whose completion is not observable through the pool.
    ///
    /// No completion channel is allocated. A panic in the task is logged
    /// and swallowed by the executing worker.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.queue.push(Box::new(task));
        trace!("Enqueued an untracked task");
    }

    /// Blocks until the queue is empty and every worker is idle.
    ///
    /// Returns immediately when the pool is [paused](Self::pause). Must not
    /// be called from within a task running on this pool; that would
    /// deadlock.
    pub fn wait(&self) {
        if !self.core.active.load(Ordering::Acquire) {
            return;
        }
        self.core.wait_until_idle();
        trace!("All workers finished their work");
    }

    /// Pauses dispatching. Already-assigned tasks run to completion;
    /// queued tasks stay queued. Submission is still accepted.
    pub fn pause(&self) {
        self.core.active.store(false, Ordering::Release);
    }

    /// Resumes dispatching after a [`pause`](Self::pause).
    pub fn resume(&self) {
        self.core.active.store(true, Ordering::Release);
    }

    /// Returns the number of worker threads (the dispatcher not included).
    pub fn worker_count(&self) -> usize {
        self.core.workers.read().len()
    }

    /// Waits for quiescence, then tears down the worker threads and spawns
    /// a fresh set of the given size (same count rules as
    /// [`with_workers`](Self::with_workers)).
    pub fn set_worker_count(&self, count: isize) {
        self.wait();
        let count = resolved_worker_count(count);

        cadre_log::with_trace_timing!("Rebuilding worker set with {} thread{}",
            count, plural_suffix(count);
        {
            let mut workers = self.core.workers.write();
            // Dropping the old workers joins their threads.
            workers.clear();
            *workers = spawn_workers(count);
        });
    }

    pub(crate) fn core(&self) -> &PoolCore {
        &self.core
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.wait();

        self.core.alive.store(false, Ordering::Release);
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("Dispatcher thread failed to join");
            }
        }

        self.core.workers.write().clear();
        trace!("All workers joined");
    }
}

impl PoolCore {
    fn dispatch_loop(&self) {
        while self.alive.load(Ordering::Acquire) {
            if !self.active.load(Ordering::Acquire) {
                thread::yield_now();
                continue;
            }

            let workers = self.workers.read();
            for (index, worker) in workers.iter().enumerate() {
                if worker.is_busy() {
                    continue;
                }
                // The assignment happens under the queue lock; see
                // `TaskQueue::pop_with`.
                self.queue.pop_with(|task| {
                    worker.assign(task);
                    trace!("Assigned task to worker {index}");
                });
            }
        }
    }

    /// Blocks until the queue is empty and no worker is busy, regardless
    /// of the pause gate. Tasks that enqueue further tasks are drained
    /// too: queue emptiness is re-checked after the workers go idle.
    pub(crate) fn wait_until_idle(&self) {
        loop {
            while !self.queue.is_empty() {
                thread::sleep(POLL_INTERVAL);
            }
            while self.any_worker_busy() {
                thread::sleep(POLL_INTERVAL);
            }
            if self.queue.is_empty() && !self.any_worker_busy() {
                break;
            }
        }
    }

    fn any_worker_busy(&self) -> bool {
        self.workers.read().iter().any(Worker::is_busy)
    }
}

fn spawn_workers(count: usize) -> Vec<Worker> {
    (0..count).map(Worker::spawn).collect()
}

fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Applies the worker count rules: non-positive requests are offsets from
/// the available parallelism, the result never drops below one, and
/// leaving fewer than two spare units of parallelism earns an advisory.
fn resolved_worker_count(requested: isize) -> usize {
    let parallelism = available_parallelism();

    let mut count = requested;
    if count <= 0 {
        count += parallelism as isize;
    }

    if count < 1 {
        debug!("{requested} worker threads is not possible, using 1 instead");
        count = 1;
    }

    if count > parallelism as isize - 2 {
        warn!(
            "{count} worker threads requested, but at most the available parallelism \
             ({parallelism}) minus 2 is recommended"
        );
    }

    count as usize
}

fn plural_suffix(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
