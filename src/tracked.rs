use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use futures::task::{self, ArcWake};

use crate::context::Scheduler;

const IDLE: u8 = 0;
const WOKEN: u8 = 1;
const DONE: u8 = 2;

/// Wake bookkeeping for one tracked task.
///
/// While the task has been woken and not yet polled it holds one unit of the scheduler's woken
/// count, so a drain cannot reach quiescence before the task has issued whatever requests its
/// wakeup leads to.
struct WakeState {
    state: AtomicU8,
    scheduler: Weak<Scheduler>,
}

impl WakeState {
    fn woken(&self) {
        let scheduler = match self.scheduler.upgrade() {
            Some(scheduler) => scheduler,
            None => return,
        };
        scheduler.observer_woken();
        if self.state.compare_exchange(IDLE, WOKEN, Ordering::AcqRel, Ordering::Acquire).is_err() {
            // already counted, or finished
            scheduler.observer_settled();
        }
    }

    fn settled(&self) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.observer_settled();
        }
    }

    fn finish(&self) {
        if self.state.swap(DONE, Ordering::AcqRel) == WOKEN {
            self.settled();
        }
    }
}

struct TrackingWaker {
    state: Arc<WakeState>,
    inner: Waker,
}

impl ArcWake for TrackingWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.state.woken();
        arc_self.inner.wake_by_ref();
    }
}

/// A future whose wakeups hold a [`LoadContext::drain`](crate::LoadContext::drain) open until
/// the future has been polled again.
///
/// A freshly created `Tracked` counts as woken, so a drain started right after spawning it waits
/// for its first poll.
pub(crate) struct Tracked<F> {
    future: Pin<Box<F>>,
    state: Arc<WakeState>,
}

impl<F> Tracked<F> {
    pub(crate) fn new(scheduler: &Arc<Scheduler>, future: F) -> Self {
        scheduler.observer_woken();
        Self {
            future: Box::pin(future),
            state: Arc::new(WakeState {
                state: AtomicU8::new(WOKEN),
                scheduler: Arc::downgrade(scheduler),
            }),
        }
    }
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let consumed = this
            .state
            .state
            .compare_exchange(WOKEN, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        let waker = task::waker(Arc::new(TrackingWaker {
            state: this.state.clone(),
            inner: cx.waker().clone(),
        }));
        let poll = this.future.as_mut().poll(&mut Context::from_waker(&waker));

        if poll.is_ready() {
            this.state.finish();
        }
        if consumed {
            this.state.settled();
        }
        poll
    }
}

impl<F> Drop for Tracked<F> {
    fn drop(&mut self) {
        self.state.finish();
    }
}
