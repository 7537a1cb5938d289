use std::borrow::Cow;
use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by batch and fetch functions.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Failure observed by a caller awaiting a [`LoadFuture`](crate::LoadFuture).
///
/// Every caller waiting on a batch observes the same error, so the fetch failure is shared behind
/// an `Arc` rather than cloned.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The batch or fetch function returned an error.
    #[error("batch fetch failed: {0}")]
    Fetch(Arc<dyn Error + Send + Sync>),
    /// The drain's cancellation token fired before the fetch completed.
    #[error("batch fetch was cancelled")]
    Cancelled,
    /// The slot was dropped without being resolved.
    #[error("request was abandoned before its batch executed")]
    Abandoned,
    /// The loader outlived the context it was created on.
    #[error("load context was dropped")]
    ContextDropped,
}

impl From<BoxError> for LoadError {
    fn from(err: BoxError) -> Self {
        LoadError::Fetch(Arc::from(err))
    }
}

/// Failure to look up a loader by key in a [`LoadContext`](crate::LoadContext) registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A loader is already registered under `key` with different key or value types.
    #[error("loader `{key}` is registered with a type other than `{expected}`")]
    TypeMismatch { key: Cow<'static, str>, expected: &'static str },
}
