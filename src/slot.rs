use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::error::LoadError;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, LoadError>>>;

/// A single-assignment cell backing every caller that requested the same key in one batch.
///
/// The write side is a oneshot sender; the read side is a [`Shared`] receiver, so any number of
/// [`LoadFuture`]s can attach before or after the value is written.
pub(crate) struct Slot<T> {
    tx: oneshot::Sender<Result<T, LoadError>>,
    rx: SharedResult<T>,
}

impl<T> Slot<T>
where
    T: 'static + Clone + Send + Sync,
{
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        let rx = rx.map(|received| received.unwrap_or(Err(LoadError::Abandoned))).boxed().shared();
        Self { tx, rx }
    }

    pub fn future(&self) -> LoadFuture<T> {
        LoadFuture { inner: self.rx.clone() }
    }

    pub fn resolve(self, value: Result<T, LoadError>) {
        let Slot { tx, rx } = self;
        if tx.send(value).is_err() {
            tracing::trace!("slot resolved with no remaining observers");
        }
        drop(rx);
    }
}

/// The future handed to each caller of `load`.
///
/// It completes once the batch its key belongs to has been executed by
/// [`LoadContext::drain`](crate::LoadContext::drain). Clones observe the same result.
#[must_use = "futures do nothing unless awaited"]
pub struct LoadFuture<T> {
    inner: SharedResult<T>,
}

impl<T> LoadFuture<T>
where
    T: 'static + Clone + Send + Sync,
{
    /// A future that is already failed with `err`.
    pub(crate) fn failed(err: LoadError) -> Self {
        let slot = Slot::new();
        let future = slot.future();
        slot.resolve(Err(err));
        future
    }
}

impl<T> Clone for LoadFuture<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Future for LoadFuture<T>
where
    T: Clone,
{
    type Output = Result<T, LoadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl<T> fmt::Debug for LoadFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFuture").finish_non_exhaustive()
    }
}
