//! Handler traits for the task queue

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::task::Task;

/// Processes the arguments of tasks routed to one subject
///
/// Handlers never run concurrently with each other: the queue's single worker
/// awaits one `handle` call before starting the next. Any async closure of the
/// shape `Fn(Vec<A>) -> impl Future<Output = anyhow::Result<()>>` is a handler.
#[async_trait]
pub trait TaskHandler<A>: Send + Sync {
    async fn handle(&self, args: Vec<A>) -> anyhow::Result<()>;
}

#[async_trait]
impl<A, F, Fut> TaskHandler<A> for F
where
    A: Send + 'static,
    F: Fn(Vec<A>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, args: Vec<A>) -> anyhow::Result<()> {
        (self)(args).await
    }
}

/// Called with the task whose handler exceeded the alarm duration
pub type AlarmFn<A> = Arc<dyn Fn(&Task<A>) + Send + Sync>;

/// Called with the history snapshot (oldest first) when the queue is full
pub type DiagnosticFn<A> = Arc<dyn Fn(&[Task<A>]) + Send + Sync>;

/// Alarm duration and the callback to run once it elapses
pub(crate) struct Alarm<A> {
    pub after: std::time::Duration,
    pub callback: AlarmFn<A>,
}
