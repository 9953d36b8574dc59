//! Unbounded FIFO queues.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use super::ActivityFlag;

struct QueueState<T> {
    items: VecDeque<T>,
    getters: Vec<Waker>,
}

/// Plain unbounded queue without activity bookkeeping.
pub struct RawQueue<T> {
    state: Rc<RefCell<QueueState<T>>>,
}

impl<T> Clone for RawQueue<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for RawQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RawQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(QueueState {
                items: VecDeque::new(),
                getters: Vec::new(),
            })),
        }
    }

    /// Appends an item and wakes pending getters.
    pub fn put(&self, item: T) {
        let getters = {
            let mut state = self.state.borrow_mut();
            state.items.push_back(item);
            std::mem::take(&mut state.getters)
        };
        for waker in getters {
            waker.wake();
        }
    }

    /// Removes the oldest item without waiting.
    pub fn try_get(&self) -> Option<T> {
        self.state.borrow_mut().items.pop_front()
    }

    /// Waits for the oldest item.
    pub fn get(&self) -> RawGet<T> {
        RawGet { queue: self.clone() }
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    /// Returns true if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().items.is_empty()
    }
}

/// Future returned by [`RawQueue::get`].
pub struct RawGet<T> {
    queue: RawQueue<T>,
}

impl<T> Future for RawGet<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.queue.state.borrow_mut();
        match state.items.pop_front() {
            Some(item) => Poll::Ready(item),
            None => {
                state.getters.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// Queue that raises the activity flag on every put and completed get.
pub struct Queue<T> {
    inner: RawQueue<T>,
    activity: ActivityFlag,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            activity: self.activity.clone(),
        }
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue reporting to `activity`.
    pub fn new(activity: ActivityFlag) -> Self {
        Self {
            inner: RawQueue::new(),
            activity,
        }
    }

    /// Appends an item. The queue is unbounded, so this never suspends.
    pub fn put(&self, item: T) {
        self.inner.put(item);
        self.activity.raise();
    }

    /// Waits for the oldest item.
    pub async fn get(&self) -> T {
        let item = self.inner.get().await;
        self.activity.raise();
        item
    }

    /// Removes the oldest item without waiting.
    pub fn try_get(&self) -> Option<T> {
        self.inner.try_get()
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("len", &self.len()).finish()
    }
}
