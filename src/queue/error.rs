//! Error types for task queue operations

/// Result type alias for task queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned to callers of [`TaskQueue`](super::TaskQueue)
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No handler is registered for the subject
    #[error("no handler registered for subject '{0}'")]
    UnknownSubject(String),

    /// Every slot of the queue is taken by a pending task
    #[error("task queue is full (capacity: {capacity})")]
    CapacityExhausted { capacity: usize },

    /// The handler ran and returned an error
    #[error(transparent)]
    Handler(anyhow::Error),

    /// The queue has been shut down and accepts no more work
    #[error("task queue is closed")]
    Closed,

    /// The completion signal was dropped before a result was sent
    #[error("task was dropped before completion")]
    Dropped,
}

impl QueueError {
    /// Whether the error was produced by the handler rather than the queue
    pub fn is_handler_error(&self) -> bool {
        matches!(self, QueueError::Handler(_))
    }
}
