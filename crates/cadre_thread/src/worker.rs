//! Worker threads executing one assigned task at a time.

use crate::queue::Task;
use cadre_log::error;
use parking_lot::Mutex;
use std::{
    fmt, panic,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

/// A thread that runs whatever task the dispatcher places in its slot.
///
/// The worker does not block on a condition variable while idle; it spins
/// with [`thread::yield_now`] between polls of its work flag, keeping the
/// assignment-to-execution latency small for short tasks.
pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

struct WorkerShared {
    /// The task currently assigned or running. Written by the dispatcher
    /// only while the work flag is clear, taken by the worker thread.
    slot: Mutex<Option<Task>>,
    has_work: AtomicBool,
    alive: AtomicBool,
}

impl Worker {
    /// Spawns a new worker thread. `index` is used only for the thread name.
    pub(crate) fn spawn(index: usize) -> Self {
        let shared = Arc::new(WorkerShared {
            slot: Mutex::new(None),
            has_work: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        });

        let handle = thread::Builder::new()
            .name(format!("cadre-worker-{index}"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.run()
            })
            .expect("failed to spawn worker thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Hands the worker a task to execute. Callers must ensure the worker
    /// is idle; the dispatcher upholds this by checking
    /// [`is_busy`](Self::is_busy) first.
    pub(crate) fn assign(&self, task: Task) {
        *self.shared.slot.lock() = Some(task);
        self.shared.has_work.store(true, Ordering::Release);
    }

    /// Whether the worker has a pending or running task.
    pub(crate) fn is_busy(&self) -> bool {
        self.shared.has_work.load(Ordering::Acquire)
    }
}

impl WorkerShared {
    fn run(&self) {
        loop {
            if self.has_work.load(Ordering::Acquire) {
                if let Some(task) = self.slot.lock().take() {
                    if let Err(cause) = panic::catch_unwind(panic::AssertUnwindSafe(task)) {
                        error!("Task panicked: {cause:?}");
                    }
                }
                self.has_work.store(false, Ordering::Release);
            } else if !self.alive.load(Ordering::Acquire) {
                // The work flag is checked first, so a task assigned just
                // before shutdown still runs.
                break;
            } else {
                thread::yield_now();
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Worker thread failed to join");
            }
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    fn wait_until_idle(worker: &Worker) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_busy() {
            assert!(Instant::now() < deadline, "worker did not go idle");
            thread::sleep(Duration::from_micros(100));
        }
    }

    #[test]
    fn spawned_worker_is_idle() {
        let worker = Worker::spawn(0);
        assert!(!worker.is_busy());
    }

    #[test]
    fn assigned_task_is_executed_and_flag_cleared() {
        let worker = Worker::spawn(0);
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            worker.assign(Box::new(move || {
                count.fetch_add(1, Ordering::Relaxed);
            }));
        }
        wait_until_idle(&worker);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn worker_survives_a_panicking_task() {
        let worker = Worker::spawn(0);
        worker.assign(Box::new(|| panic!("intentional panic for testing")));
        wait_until_idle(&worker);

        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            worker.assign(Box::new(move || {
                count.fetch_add(1, Ordering::Relaxed);
            }));
        }
        wait_until_idle(&worker);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn assigned_task_runs_before_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let worker = Worker::spawn(0);
            let count = Arc::clone(&count);
            worker.assign(Box::new(move || {
                count.fetch_add(1, Ordering::Relaxed);
            }));
            // Dropping joins the thread, which must run the task first.
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
