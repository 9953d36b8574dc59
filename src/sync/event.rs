//! Events: a flag that tasks can wait on.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use super::ActivityFlag;

#[derive(Debug, Default)]
struct EventState {
    set: bool,
    /// Bumped on every clear->set transition.
    generation: u64,
    waiters: Vec<Waker>,
}

/// Plain event without activity bookkeeping.
///
/// A waiter that registered before a `set` completes even if the event is
/// cleared again before the waiter gets polled, which is what a clock
/// event that is set and immediately cleared relies on.
#[derive(Clone, Debug, Default)]
pub struct RawEvent {
    state: Rc<RefCell<EventState>>,
}

impl RawEvent {
    /// Creates a cleared event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event and wakes every waiter.
    pub fn set(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.set {
                return;
            }
            state.set = true;
            state.generation += 1;
            std::mem::take(&mut state.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
    }

    /// Clears the event.
    pub fn clear(&self) {
        self.state.borrow_mut().set = false;
    }

    /// Returns true if the event is currently set.
    pub fn is_set(&self) -> bool {
        self.state.borrow().set
    }

    /// Returns the number of tasks currently registered as waiters.
    pub fn waiter_count(&self) -> usize {
        self.state.borrow().waiters.len()
    }

    /// Waits until the event is set.
    pub fn wait(&self) -> RawEventWait {
        RawEventWait {
            event: self.clone(),
            seen: None,
        }
    }
}

/// Future returned by [`RawEvent::wait`].
#[derive(Debug)]
pub struct RawEventWait {
    event: RawEvent,
    seen: Option<u64>,
}

impl Future for RawEventWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.event.state.borrow_mut();
        if state.set {
            return Poll::Ready(());
        }
        if let Some(seen) = self.seen {
            if seen != state.generation {
                return Poll::Ready(());
            }
        }
        let generation = state.generation;
        state.waiters.push(cx.waker().clone());
        drop(state);
        self.seen = Some(generation);
        Poll::Pending
    }
}

/// Event that raises the activity flag when a wait completes.
#[derive(Clone, Debug)]
pub struct Event {
    inner: RawEvent,
    activity: ActivityFlag,
}

impl Event {
    /// Creates a cleared event reporting to `activity`.
    pub fn new(activity: ActivityFlag) -> Self {
        Self {
            inner: RawEvent::new(),
            activity,
        }
    }

    /// Sets the event and wakes every waiter.
    pub fn set(&self) {
        self.inner.set();
    }

    /// Clears the event.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Returns true if the event is currently set.
    pub fn is_set(&self) -> bool {
        self.inner.is_set()
    }

    /// Returns the underlying plain event.
    pub fn raw(&self) -> &RawEvent {
        &self.inner
    }

    /// Waits until the event is set, then marks the settle pass active.
    pub async fn wait(&self) {
        self.inner.wait().await;
        self.activity.raise();
    }
}
