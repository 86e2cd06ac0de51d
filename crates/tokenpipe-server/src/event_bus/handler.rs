use std::future::Future;

use async_trait::async_trait;

use super::BusEvent;

/// Receives events from the bus.
///
/// Errors are logged by the bus and never reach the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}
