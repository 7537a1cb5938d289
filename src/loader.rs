use std::fmt::{self, Debug};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "stats")]
use crate::loader_stats::LoaderStats;
use crate::{
    batch_function::{BatchFunction, FetchFunction},
    context::{LoadContext, Scheduler},
    error::{BoxError, LoadError},
    pending::PendingBatch,
    runnable::{FollowUp, Runnable},
    slot::LoadFuture,
};

/// The open batch of a loader and its route back to the scheduler.
///
/// `enqueue` and `close` take the same lock, so a request either lands in the batch that the next
/// `close` hands out, or it opens a fresh batch and registers the loader again. Nothing is added
/// to a batch after it has been closed.
struct Batcher<K, T> {
    batch: Mutex<PendingBatch<K, T>>,
    scheduler: Weak<Scheduler>,
    debug_name: &'static str,
    #[cfg(feature = "stats")]
    stats: Mutex<LoaderStats>,
}

impl<K, T> Batcher<K, T>
where
    K: Eq + Hash,
    T: 'static + Clone + Send + Sync,
{
    fn new(context: &LoadContext, debug_name: &'static str) -> Self {
        Self {
            batch: Mutex::new(PendingBatch::new()),
            scheduler: context.scheduler(),
            debug_name,
            #[cfg(feature = "stats")]
            stats: Mutex::new(LoaderStats::new(debug_name)),
        }
    }

    fn enqueue(&self, key: K, runnable: impl FnOnce() -> Arc<dyn Runnable>) -> LoadFuture<T> {
        let scheduler = match self.scheduler.upgrade() {
            Some(scheduler) => scheduler,
            None => return LoadFuture::failed(LoadError::ContextDropped),
        };

        let mut batch = self.batch.lock();
        let enqueued = batch.enqueue(key);
        if enqueued.opened {
            scheduler.register(runnable());
        }
        tracing::trace!(
            loader = self.debug_name,
            opened = enqueued.opened,
            deduplicated = enqueued.deduplicated,
            "load requested"
        );
        #[cfg(feature = "stats")]
        self.stats.lock().record_request(enqueued.deduplicated);
        enqueued.future
    }

    fn close(&self) -> PendingBatch<K, T> {
        self.batch.lock().take()
    }

    fn pending_len(&self) -> usize {
        self.batch.lock().len()
    }
}

#[cfg(feature = "stats")]
impl<K, T> Drop for Batcher<K, T> {
    fn drop(&mut self) {
        tracing::debug!(loader_stats = ?self.stats.get_mut());
    }
}

async fn fetch_cancellable<T>(
    cancel: &CancellationToken,
    fetch: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, LoadError> {
    if cancel.is_cancelled() {
        return Err(LoadError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LoadError::Cancelled),
        outcome = fetch => outcome.map_err(LoadError::from),
    }
}

struct KeyedInner<K, V> {
    batcher: Batcher<K, Option<V>>,
    fetch: Box<dyn BatchFunction<K, V>>,
}

#[async_trait]
impl<K, V> Runnable for KeyedInner<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    #[tracing::instrument(skip_all, fields(loader = self.batcher.debug_name))]
    async fn execute(self: Arc<Self>, cancel: CancellationToken) -> Option<FollowUp> {
        let batch = self.batcher.close();
        if batch.is_empty() {
            return None;
        }

        let loader = self.batcher.debug_name;
        let keys = batch.keys().cloned().collect::<Vec<_>>();
        tracing::debug!(loader, ?keys, "executing batch");
        let outcome = fetch_cancellable(&cancel, self.fetch.load(&keys, &cancel)).await;

        match &outcome {
            Ok(values) => {
                let missing = keys.iter().filter(|key| !values.contains_key(*key)).count();
                tracing::debug!(loader, requested = keys.len(), missing, "batch fetched");
                #[cfg(feature = "stats")]
                {
                    let mut stats = self.batcher.stats.lock();
                    stats.record_batch(keys.len());
                    stats.record_missing(missing);
                }
            }
            Err(err) => {
                tracing::warn!(loader, requested = keys.len(), %err, "batch failed");
                #[cfg(feature = "stats")]
                {
                    let mut stats = self.batcher.stats.lock();
                    stats.record_batch(keys.len());
                    stats.record_failure();
                }
            }
        }

        Some(
            async move {
                match outcome {
                    Ok(mut values) => {
                        for (key, slot) in batch.into_slots() {
                            let value = values.remove(&key);
                            slot.resolve(Ok(value));
                        }
                    }
                    Err(err) => {
                        for (_key, slot) in batch.into_slots() {
                            slot.resolve(Err(err.clone()));
                        }
                    }
                }
                tokio::task::yield_now().await;
            }
            .boxed(),
        )
    }
}

/// Coalesces `load(key)` calls into one call of its [`BatchFunction`] per drain pass.
///
/// Every call made before the owning [`LoadContext`] is drained joins the same batch. Equal keys
/// share a single slot, so the batch function sees each key once and every caller receives a
/// clone of the same value. Keys missing from the batch function's result resolve to `None`.
///
/// `KeyedLoader` is a cheap handle; clones share the same batch.
pub struct KeyedLoader<K, V> {
    inner: Arc<KeyedInner<K, V>>,
}

impl<K, V> Clone for KeyedLoader<K, V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K, V> KeyedLoader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    /// Creates a loader bound to `context` that fetches through `fetch`.
    pub fn new<F>(context: &LoadContext, fetch: F) -> Self
    where
        F: BatchFunction<K, V>,
    {
        Self {
            inner: Arc::new(KeyedInner {
                batcher: Batcher::new(context, std::any::type_name::<(K, V)>()),
                fetch: Box::new(fetch),
            }),
        }
    }

    /// Requests the value for `key`.
    ///
    /// Never blocks. The returned future completes once the context drains this loader's batch.
    pub fn load(&self, key: K) -> LoadFuture<Option<V>> {
        self.inner.batcher.enqueue(key, || self.inner.clone() as Arc<dyn Runnable>)
    }

    /// Requests many values at once, returned in the order of `keys`.
    ///
    /// All keys join the open batch before this returns; the future fails with the first error
    /// observed among them.
    pub fn load_many<I>(&self, keys: I) -> impl Future<Output = Result<Vec<Option<V>>, LoadError>>
    where
        I: IntoIterator<Item = K>,
    {
        let futures = keys.into_iter().map(|key| self.load(key)).collect::<Vec<_>>();
        future::try_join_all(futures)
    }

    /// Number of distinct keys waiting in the open batch.
    pub fn pending_len(&self) -> usize {
        self.inner.batcher.pending_len()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> LoaderStats {
        self.inner.batcher.stats.lock().clone()
    }
}

impl<K, V> Debug for KeyedLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLoader").field("kv", &self.inner.batcher.debug_name).finish()
    }
}

struct KeylessInner<V> {
    batcher: Batcher<(), V>,
    fetch: Box<dyn FetchFunction<V>>,
}

#[async_trait]
impl<V> Runnable for KeylessInner<V>
where
    V: 'static + Clone + Send + Sync,
{
    #[tracing::instrument(skip_all, fields(loader = self.batcher.debug_name))]
    async fn execute(self: Arc<Self>, cancel: CancellationToken) -> Option<FollowUp> {
        let batch = self.batcher.close();
        if batch.is_empty() {
            return None;
        }

        let loader = self.batcher.debug_name;
        tracing::debug!(loader, "executing keyless batch");
        let outcome = fetch_cancellable(&cancel, self.fetch.fetch(&cancel)).await;
        if let Err(err) = &outcome {
            tracing::warn!(loader, %err, "keyless batch failed");
        }
        #[cfg(feature = "stats")]
        {
            let mut stats = self.batcher.stats.lock();
            stats.record_batch(batch.len());
            if outcome.is_err() {
                stats.record_failure();
            }
        }

        Some(
            async move {
                for (_unit, slot) in batch.into_slots() {
                    slot.resolve(outcome.clone());
                }
                tokio::task::yield_now().await;
            }
            .boxed(),
        )
    }
}

/// The keyless form of [`KeyedLoader`]: every `load()` made before a drain shares one call of
/// its [`FetchFunction`] and observes the same value.
pub struct Loader<V> {
    inner: Arc<KeylessInner<V>>,
}

impl<V> Clone for Loader<V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<V> Loader<V>
where
    V: 'static + Clone + Send + Sync,
{
    pub fn new<F>(context: &LoadContext, fetch: F) -> Self
    where
        F: FetchFunction<V>,
    {
        Self {
            inner: Arc::new(KeylessInner {
                batcher: Batcher::new(context, std::any::type_name::<V>()),
                fetch: Box::new(fetch),
            }),
        }
    }

    /// Requests the value. Completes once the context drains this loader's batch.
    pub fn load(&self) -> LoadFuture<V> {
        self.inner.batcher.enqueue((), || self.inner.clone() as Arc<dyn Runnable>)
    }

    /// Whether a request is waiting in the open batch.
    pub fn is_pending(&self) -> bool {
        self.inner.batcher.pending_len() > 0
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> LoaderStats {
        self.inner.batcher.stats.lock().clone()
    }
}

impl<V> Debug for Loader<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").field("v", &self.inner.batcher.debug_name).finish()
    }
}
