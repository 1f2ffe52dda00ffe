use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

/// Receives each combined payload produced by a flush
///
/// Within one flush, payloads are delivered one after another in the order the
/// combine strategy produced them. Failures are logged by the batcher and not
/// retried. Async closures `Fn(Bytes) -> impl Future<Output = anyhow::Result<()>>`
/// implement this trait.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, payload: Bytes) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Deliver for F
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn deliver(&self, payload: Bytes) -> anyhow::Result<()> {
        (self)(payload).await
    }
}
