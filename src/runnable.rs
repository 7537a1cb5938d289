use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Work left over after a batch has been fetched: resolving its slots.
///
/// It runs as its own unit inside the drain so that futures woken by the resolution get a chance
/// to issue new requests before the drain checks for quiescence.
pub(crate) type FollowUp = BoxFuture<'static, ()>;

/// What a loader exposes to the [`LoadContext`](crate::LoadContext) once it has an open batch.
#[async_trait]
pub(crate) trait Runnable: Send + Sync {
    /// Closes the current batch and fetches it.
    ///
    /// Returns `None` when the batch turned out to be empty.
    async fn execute(self: Arc<Self>, cancel: CancellationToken) -> Option<FollowUp>;
}
