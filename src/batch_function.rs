use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// A `BatchFunction` defines the method through which a [`KeyedLoader`](crate::KeyedLoader)
/// fetches batched data from some resource. It receives the distinct keys that were requested
/// since the loader's batch last closed, along with the drain's cancellation token.
///
/// The function is not required to return a value for every key it was given. Requesters of keys
/// missing from the returned map receive `None`; that is not treated as an error. Returning `Err`
/// fails every request in the batch with the same [`LoadError::Fetch`](crate::LoadError::Fetch).
/// Retrying is left to the implementation.
///
/// The function may itself load from other loaders (or from its own loader) before returning;
/// those requests are picked up by the drain that is executing this batch.
///
/// Closures of the shape `Fn(Vec<K>, CancellationToken) -> impl Future<Output = Result<HashMap<K,
/// V>, E>>` implement this trait.
#[async_trait]
pub trait BatchFunction<K, V>: Send + Sync + 'static {
    async fn load(&self, keys: &[K], cancel: &CancellationToken)
        -> Result<HashMap<K, V>, BoxError>;
}

/// The keyless counterpart of [`BatchFunction`], used by [`Loader`](crate::Loader). Every request
/// made during one batch shares the single value it returns.
#[async_trait]
pub trait FetchFunction<V>: Send + Sync + 'static {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<V, BoxError>;
}

#[async_trait]
impl<K, V, F, Fut, E> BatchFunction<K, V> for F
where
    K: 'static + Eq + Hash + Clone + Send + Sync,
    V: 'static + Send,
    F: 'static + Fn(Vec<K>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HashMap<K, V>, E>> + Send,
    E: Into<BoxError>,
{
    async fn load(
        &self,
        keys: &[K],
        cancel: &CancellationToken,
    ) -> Result<HashMap<K, V>, BoxError> {
        (self)(keys.to_vec(), cancel.clone()).await.map_err(Into::into)
    }
}

#[async_trait]
impl<V, F, Fut, E> FetchFunction<V> for F
where
    V: 'static + Send,
    F: 'static + Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send,
    E: Into<BoxError>,
{
    async fn fetch(&self, cancel: &CancellationToken) -> Result<V, BoxError> {
        (self)(cancel.clone()).await.map_err(Into::into)
    }
}
