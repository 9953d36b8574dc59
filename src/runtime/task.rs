//! Task bookkeeping for the cooperative runtime: the ready queue, the
//! waker that feeds it, and the join handle returned by `spawn`.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::types::TaskId;

/// FIFO of runnable tasks. A task is queued at most once.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    order: VecDeque<TaskId>,
    queued: HashSet<TaskId>,
}

impl ReadyQueue {
    pub(crate) fn push(&mut self, id: TaskId) {
        if self.queued.insert(id) {
            self.order.push_back(id);
        }
    }

    pub(crate) fn pop(&mut self) -> Option<TaskId> {
        let id = self.order.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// True if any task other than `id` is waiting to be polled.
    pub(crate) fn contains_other(&self, id: TaskId) -> bool {
        self.order.iter().any(|&queued| queued != id)
    }
}

pub(crate) type SharedReadyQueue = Arc<Mutex<ReadyQueue>>;

/// Waker that reschedules a task by pushing its id onto the ready queue.
pub(crate) struct TaskWaker {
    pub(crate) id: TaskId,
    pub(crate) ready: SharedReadyQueue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.ready.lock().push(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.ready.lock().push(self.id);
    }
}

pub(crate) struct JoinState<T> {
    pub(crate) output: Option<T>,
    pub(crate) finished: bool,
    pub(crate) waiter: Option<Waker>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Self {
        Self {
            output: None,
            finished: false,
            waiter: None,
        }
    }

    pub(crate) fn complete(&mut self, output: T) {
        self.output = Some(output);
        self.finished = true;
        if let Some(waker) = self.waiter.take() {
            waker.wake();
        }
    }
}

/// Handle to a spawned task. Awaiting it yields the task's output.
pub struct JoinHandle<T> {
    id: TaskId,
    name: String,
    state: Rc<RefCell<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, name: String, state: Rc<RefCell<JoinState<T>>>) -> Self {
        Self { id, name, state }
    }

    /// Returns the id of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the name the task was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    /// Takes the output of a finished task without awaiting.
    pub fn try_take(&self) -> Option<T> {
        self.state.borrow_mut().output.take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.state.borrow_mut();
        match state.output.take() {
            Some(output) => Poll::Ready(output),
            None => {
                state.waiter = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
