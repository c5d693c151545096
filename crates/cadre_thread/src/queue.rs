//! FIFO queue of type-erased tasks.

use parking_lot::Mutex;
use std::{collections::VecDeque, fmt};

/// A type-erased unit of work. Any result is delivered through a side
/// channel captured inside the closure.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// An unbounded FIFO of pending tasks behind a single mutex. Any thread may
/// push; only the pool's dispatcher pops.
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub(crate) fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    /// Appends all the given tasks under a single lock acquisition, so the
    /// batch is contiguous with respect to concurrent submissions.
    pub(crate) fn push_batch(&self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.lock().extend(tasks);
    }

    /// Pops the head task, if any, and hands it to `consume` while still
    /// holding the queue lock. This keeps a task observably either queued
    /// or on a busy worker, which the quiescence check relies on.
    pub(crate) fn pop_with(&self, consume: impl FnOnce(Task)) -> bool {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.pop_front() {
            consume(task);
            true
        } else {
            false
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.tasks.lock().len())
            .finish()
    }
}
