use std::any::{type_name, Any};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::{
    batch_function::{BatchFunction, FetchFunction},
    error::RegistryError,
    loader::{KeyedLoader, Loader},
    runnable::{FollowUp, Runnable},
    tracked::Tracked,
};

/// Loaders that have opened a batch since the last drain pass took them, plus the number of
/// tracked tasks that have been woken and not yet polled.
#[derive(Default)]
pub(crate) struct Scheduler {
    runnable: Mutex<Vec<Arc<dyn Runnable>>>,
    woken: AtomicUsize,
    changed: Notify,
}

impl Scheduler {
    pub(crate) fn register(&self, loader: Arc<dyn Runnable>) {
        self.runnable.lock().push(loader);
        self.changed.notify_waiters();
    }

    pub(crate) fn observer_woken(&self) {
        self.woken.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn observer_settled(&self) {
        self.woken.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub(crate) fn woken(&self) -> usize {
        self.woken.load(Ordering::SeqCst)
    }

    fn take(&self) -> Vec<Arc<dyn Runnable>> {
        mem::take(&mut *self.runnable.lock())
    }

    fn len(&self) -> usize {
        self.runnable.lock().len()
    }

    fn is_idle(&self) -> bool {
        self.woken() == 0 && self.len() == 0
    }
}

/// Counts describing one call of [`LoadContext::drain`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Registration sweeps that found at least one runnable loader.
    pub passes: usize,
    /// Loader batches executed, including ones that turned out to be empty.
    pub batches: usize,
    /// Slot resolutions completed.
    pub follow_ups: usize,
}

enum Completed {
    Batch(Option<FollowUp>),
    Resolved,
}

type Registry = HashMap<Cow<'static, str>, Box<dyn Any + Send + Sync>>;

/// The scheduling context shared by every loader serving one unit of work, typically one inbound
/// request.
///
/// Loaders register here when their batch opens. Nothing is fetched until [`LoadContext::drain`]
/// is awaited, which keeps executing runnable loaders, including those registered as a side
/// effect of earlier batches, until no work remains.
///
/// `LoadContext` is a cheap handle; clones refer to the same scheduler and registry.
#[derive(Clone, Default)]
pub struct LoadContext {
    scheduler: Arc<Scheduler>,
    registry: Arc<Mutex<Registry>>,
}

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn scheduler(&self) -> Weak<Scheduler> {
        Arc::downgrade(&self.scheduler)
    }

    /// Number of loaders registered and not yet taken by a drain.
    pub fn runnable_len(&self) -> usize {
        self.scheduler.len()
    }

    /// Executes every runnable loader until quiescence.
    ///
    /// Loaders taken in the same pass run concurrently. Completing a batch schedules the
    /// resolution of its slots as a separate unit. Requests issued while the drain runs are
    /// executed by this same call when they come from a batch function, from futures polled
    /// alongside the drain (`join`, `select`), or from tasks started with [`LoadContext::spawn`].
    /// The drain returns once no loader is registered, nothing is in flight, and every such task
    /// woken by a resolution has been polled again. Draining an idle context returns immediately.
    ///
    /// Tasks spawned by other means are not tracked: a request they issue after observing a
    /// resolved value may land after this call returned, and then waits for the next drain.
    ///
    /// Once `cancel` fires, batches that have not finished fetching fail with
    /// [`LoadError::Cancelled`](crate::LoadError::Cancelled); the drain still runs to quiescence.
    pub async fn drain(&self, cancel: CancellationToken) -> DrainSummary {
        let span = tracing::debug_span!("drain");
        let mut summary = DrainSummary::default();
        let mut in_flight = FuturesUnordered::<BoxFuture<'static, Completed>>::new();

        loop {
            // Created before the checks below so no registration or settle is missed.
            let changed = self.scheduler.changed.notified();
            tokio::pin!(changed);

            let runnable = self.scheduler.take();
            if !runnable.is_empty() {
                summary.passes += 1;
                tracing::trace!(
                    parent: &span,
                    loaders = runnable.len(),
                    in_flight = in_flight.len(),
                    "drain.pass"
                );
                for loader in runnable {
                    summary.batches += 1;
                    let unit = loader.execute(cancel.clone()).map(Completed::Batch);
                    in_flight.push(unit.instrument(span.clone()).boxed());
                }
            }

            if in_flight.is_empty() {
                if self.scheduler.is_idle() {
                    break;
                }
                tracing::trace!(parent: &span, woken = self.scheduler.woken(), "drain.wait");
                changed.await;
                continue;
            }

            tokio::select! {
                Some(completed) = in_flight.next() => match completed {
                    Completed::Batch(Some(follow_up)) => {
                        let unit = follow_up.map(|()| Completed::Resolved);
                        in_flight.push(unit.instrument(span.clone()).boxed());
                    }
                    Completed::Batch(None) => {}
                    Completed::Resolved => summary.follow_ups += 1,
                },
                _ = &mut changed => {}
            }
        }

        tracing::debug!(
            parent: &span,
            passes = summary.passes,
            batches = summary.batches,
            follow_ups = summary.follow_ups,
            "drain complete"
        );
        summary
    }

    /// Spawns `future` on the current tokio runtime as a task tracked by this context.
    ///
    /// Whenever the task is woken, by a resolved [`LoadFuture`](crate::LoadFuture) or anything
    /// else, a running [`drain`](LoadContext::drain) waits for the task to be polled before it
    /// checks for quiescence. Requests the task issues in reaction to a resolved value therefore
    /// join the same drain, on any runtime flavor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(Tracked::new(&self.scheduler, future))
    }

    /// Returns the keyed loader registered under `key`, creating it with `make` on first use.
    ///
    /// Loaders fetched under the same key share their batches. The key is chosen by the caller;
    /// two structurally identical batch functions only share a loader if they are registered under
    /// the same key.
    pub fn keyed_loader<K, V, F>(
        &self,
        key: impl Into<Cow<'static, str>>,
        make: impl FnOnce() -> F,
    ) -> Result<KeyedLoader<K, V>, RegistryError>
    where
        K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
        V: 'static + Clone + Send + Sync,
        F: BatchFunction<K, V>,
    {
        self.registered(key, || KeyedLoader::new(self, make()))
    }

    /// Returns the keyless loader registered under `key`, creating it with `make` on first use.
    pub fn loader<V, F>(
        &self,
        key: impl Into<Cow<'static, str>>,
        make: impl FnOnce() -> F,
    ) -> Result<Loader<V>, RegistryError>
    where
        V: 'static + Clone + Send + Sync,
        F: FetchFunction<V>,
    {
        self.registered(key, || Loader::new(self, make()))
    }

    fn registered<L>(
        &self,
        key: impl Into<Cow<'static, str>>,
        make: impl FnOnce() -> L,
    ) -> Result<L, RegistryError>
    where
        L: 'static + Clone + Send + Sync,
    {
        let key = key.into();
        if let Some(existing) = self.registry.lock().get(&key) {
            return downcast_loader(&key, &**existing);
        }

        // `make` runs unlocked and may fetch other loaders from this context. A concurrent
        // registration of the same key wins over ours.
        let built = make();
        let mut registry = self.registry.lock();
        let entry = registry.entry(key.clone()).or_insert_with(|| {
            tracing::trace!(%key, "registering loader");
            Box::new(built) as Box<dyn Any + Send + Sync>
        });
        downcast_loader(&key, &**entry)
    }
}

fn downcast_loader<L>(
    key: &Cow<'static, str>,
    entry: &(dyn Any + Send + Sync),
) -> Result<L, RegistryError>
where
    L: 'static + Clone,
{
    entry.downcast_ref::<L>().cloned().ok_or_else(|| RegistryError::TypeMismatch {
        key: key.clone(),
        expected: type_name::<L>(),
    })
}
