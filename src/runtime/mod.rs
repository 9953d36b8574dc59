//! Single-threaded cooperative runtime.
//!
//! The runtime owns every spawned task and polls runnable tasks one at a
//! time in FIFO order. At most one task runs at any moment; tasks
//! interleave only at their suspension points.
//!
//! # Implementation Notes
//!
//! - Futures are stored in a slot table keyed by [`TaskId`]. While a task
//!   is being polled its future is taken out of the table, so the task may
//!   freely spawn new tasks.
//! - Wakers push the task id onto a shared ready queue. The queue is
//!   guarded by a `parking_lot::Mutex` because `std::task::Waker` must be
//!   `Send + Sync`, even though every waker fires on the runtime thread.
//! - [`Spawner::has_runnable_except`] exposes the true queue depth to the
//!   cycle-settling scheduler.

pub mod task;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{BenchError, BenchResult};
use crate::types::{LocalBoxFuture, TaskId};

pub use task::JoinHandle;
use task::{JoinState, ReadyQueue, SharedReadyQueue, TaskWaker};

struct TaskSlot {
    name: String,
    future: Option<LocalBoxFuture<'static, ()>>,
}

struct RuntimeInner {
    tasks: RefCell<HashMap<TaskId, TaskSlot>>,
    ready: SharedReadyQueue,
    next_id: Cell<TaskId>,
    polls: Cell<u64>,
}

/// Cheap, cloneable handle used to spawn tasks onto a [`Runtime`].
#[derive(Clone)]
pub struct Spawner {
    inner: Rc<RuntimeInner>,
}

impl Spawner {
    /// Spawns an unnamed task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.spawn_named("task", future)
    }

    /// Spawns a task with a name used in logs and diagnostics.
    pub fn spawn_named<F>(&self, name: impl Into<String>, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let name = name.into();

        let state = Rc::new(RefCell::new(JoinState::new()));
        let completion = state.clone();
        let wrapped = async move {
            let output = future.await;
            completion.borrow_mut().complete(output);
        };

        tracing::trace!(task = id, name = %name, "spawn");
        self.inner.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                name: name.clone(),
                future: Some(Box::pin(wrapped)),
            },
        );
        self.inner.ready.lock().push(id);

        JoinHandle::new(id, name, state)
    }

    /// Returns true if any task other than `id` is runnable right now.
    pub fn has_runnable_except(&self, id: TaskId) -> bool {
        self.inner.ready.lock().contains_other(id)
    }

    /// Returns the number of tasks waiting to be polled.
    pub fn runnable_count(&self) -> usize {
        self.inner.ready.lock().len()
    }

    /// Returns the number of live (not yet completed) tasks.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Returns the total number of tasks spawned so far.
    pub fn spawned_count(&self) -> u64 {
        self.inner.next_id.get()
    }

    /// Returns the total number of polls performed so far.
    pub fn poll_count(&self) -> u64 {
        self.inner.polls.get()
    }

    /// Returns the names of all live tasks, ordered by task id.
    pub fn task_names(&self) -> Vec<String> {
        let tasks = self.inner.tasks.borrow();
        let mut entries: Vec<_> = tasks.iter().map(|(id, slot)| (*id, slot.name.clone())).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, name)| name).collect()
    }

    fn pop_ready(&self) -> Option<TaskId> {
        self.inner.ready.lock().pop()
    }

    fn poll_task(&self, id: TaskId) {
        let future = {
            let mut tasks = self.inner.tasks.borrow_mut();
            tasks.get_mut(&id).and_then(|slot| slot.future.take())
        };
        // Spurious wake of a finished task
        let Some(mut future) = future else {
            return;
        };

        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            ready: self.inner.ready.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        self.inner.polls.set(self.inner.polls.get() + 1);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.inner.tasks.borrow_mut().remove(&id);
            }
            Poll::Pending => {
                if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(&id) {
                    slot.future = Some(future);
                }
            }
        }
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("tasks", &self.task_count())
            .field("runnable", &self.runnable_count())
            .finish()
    }
}

/// The cooperative runtime.
///
/// # Example
///
/// ```
/// use cyclebench::runtime::Runtime;
///
/// let rt = Runtime::new();
/// let spawner = rt.spawner();
/// let out = rt
///     .block_on(async move {
///         let child = spawner.spawn(async { 20 + 1 });
///         child.await * 2
///     })
///     .unwrap();
/// assert_eq!(out, 42);
/// ```
pub struct Runtime {
    spawner: Spawner,
}

impl Runtime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self {
            spawner: Spawner {
                inner: Rc::new(RuntimeInner {
                    tasks: RefCell::new(HashMap::new()),
                    ready: Arc::new(Mutex::new(ReadyQueue::default())),
                    next_id: Cell::new(0),
                    polls: Cell::new(0),
                }),
            },
        }
    }

    /// Returns a spawner for this runtime.
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Drives `future` to completion, polling every other runnable task
    /// along the way.
    ///
    /// Returns [`BenchError::Stalled`] if the root future is still pending
    /// and no task is runnable. A task that never suspends hangs this call.
    pub fn block_on<F>(&self, future: F) -> BenchResult<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let root = self.spawner.spawn_named("main", future);

        loop {
            if root.is_finished() {
                return root
                    .try_take()
                    .ok_or_else(|| BenchError::TaskDropped(root.name().to_string()));
            }

            match self.spawner.pop_ready() {
                Some(id) => self.spawner.poll_task(id),
                None => {
                    tracing::error!(tasks = ?self.spawner.task_names(), "runtime stalled");
                    return Err(BenchError::Stalled);
                }
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`yield_now`].
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspends the current task exactly once, letting every task that is
/// already runnable run first.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

/// Awaits every handle in submission order and collects the outputs.
pub async fn gather<T>(handles: Vec<JoinHandle<T>>) -> Vec<T> {
    let mut outputs = Vec::with_capacity(handles.len());
    for handle in handles {
        outputs.push(handle.await);
    }
    outputs
}
