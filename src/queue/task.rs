//! Task values and completion handles

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, oneshot};

use super::error::{QueueError, QueueResult};
use super::handler::TaskHandler;

/// One unit of work routed to the handler registered for `subject`
///
/// Tasks are cloned into the diagnostic history and handed to alarm
/// callbacks, so they only carry plain data. The completion signal lives
/// next to the task inside the queue, not in the task itself.
#[derive(Debug, Clone)]
pub struct Task<A> {
    /// Subject used to look up the handler
    pub subject: String,

    /// Arguments passed to the handler, in order
    pub args: Vec<A>,

    /// Sequence index assigned at enqueue time (wraps at 256)
    pub index: u8,

    /// When the task was accepted by the queue
    pub enqueued_at: DateTime<Utc>,
}

impl<A> Task<A> {
    pub(crate) fn new(subject: String, args: Vec<A>, index: u8) -> Self {
        Self {
            subject,
            args,
            index,
            enqueued_at: Utc::now(),
        }
    }
}

/// A task travelling from the producer to the worker
///
/// The permit holds one slot of queue capacity and is released once the
/// handler has returned and the result has been sent.
pub(crate) struct Job<A> {
    pub task: Task<A>,
    pub handler: Arc<dyn TaskHandler<A>>,
    pub respond_to: oneshot::Sender<anyhow::Result<()>>,
    pub permit: OwnedSemaphorePermit,
}

/// Caller side of an enqueued task
///
/// Dropping the handle does not cancel the task; the worker still runs it.
#[derive(Debug)]
pub struct TaskHandle<A> {
    task: Task<A>,
    completion: Option<oneshot::Receiver<anyhow::Result<()>>>,
}

impl<A> TaskHandle<A> {
    pub(crate) fn new(task: Task<A>, completion: oneshot::Receiver<anyhow::Result<()>>) -> Self {
        Self {
            task,
            completion: Some(completion),
        }
    }

    /// The task as it was enqueued
    pub fn task(&self) -> &Task<A> {
        &self.task
    }

    /// Sequence index of the task
    pub fn index(&self) -> u8 {
        self.task.index
    }

    /// Wait for the handler to finish and return its result
    pub async fn wait(self) -> QueueResult<()> {
        let Some(completion) = self.completion else {
            return Err(QueueError::Dropped);
        };

        match completion.await {
            Ok(result) => result.map_err(QueueError::Handler),
            Err(_) => Err(QueueError::Dropped),
        }
    }

    /// Check for a result without waiting
    ///
    /// Returns `None` while the task is still pending, and also once a result
    /// has already been taken from this handle.
    pub fn try_result(&mut self) -> Option<QueueResult<()>> {
        let completion = self.completion.as_mut()?;

        let result = match completion.try_recv() {
            Ok(result) => result.map_err(QueueError::Handler),
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(QueueError::Dropped),
        };

        self.completion = None;
        Some(result)
    }
}
