//! One-shot completion channels for tracked task submissions.

use crossbeam_channel::{Receiver, Sender};
use std::{fmt, panic, thread};

/// What the executing worker delivers for a tracked task: the closure's
/// return value, or the payload of the panic that terminated it.
pub(crate) type Completion<R> = thread::Result<R>;

/// Consumer end of a one-shot completion channel, returned by
/// [`ThreadPool::submit`](crate::ThreadPool::submit).
///
/// The handle becomes ready exactly once, after the submitted closure has
/// returned. Producer and consumer share ownership of the channel; whichever
/// side is released last deallocates it.
pub struct TaskHandle<R> {
    receiver: Receiver<Completion<R>>,
}

/// Producer end of a one-shot completion channel, captured inside the
/// enqueued closure.
pub(crate) struct TaskSender<R> {
    sender: Sender<Completion<R>>,
}

/// Creates a connected producer/consumer pair for a single task completion.
pub(crate) fn completion_channel<R>() -> (TaskSender<R>, TaskHandle<R>) {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    (TaskSender { sender }, TaskHandle { receiver })
}

impl<R> TaskHandle<R> {
    /// Whether the task has completed and the result can be consumed
    /// without blocking.
    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Blocks until the task has completed and returns its result.
    ///
    /// If the task panicked, the panic is resumed on the calling thread.
    ///
    /// # Panics
    /// If the producer was dropped without completing the task, which
    /// happens when the owning pool is torn down with the task still
    /// queued.
    pub fn wait(self) -> R {
        match self.receiver.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("task was dropped before completing"),
        }
    }
}

impl<R> TaskSender<R> {
    /// Delivers the completion to the consumer. The consumer may already
    /// have discarded its handle, in which case the completion is dropped.
    pub(crate) fn fulfill(self, completion: Completion<R>) {
        let _ = self.sender.send(completion);
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}
