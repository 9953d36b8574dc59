//! Per-cycle priority queue for model-side continuations.
//!
//! Entries are collected while a cycle settles and drained once, right
//! before the DUT step, in ascending priority. Entries with equal priority
//! keep their submission order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::sync::Event;
use crate::types::{LocalBoxFuture, Priority};

/// One deferred continuation.
pub struct PriorityEntry {
    task: LocalBoxFuture<'static, ()>,
    priority: Priority,
    done: Event,
    seq: u64,
}

impl PriorityEntry {
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl std::fmt::Debug for PriorityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityEntry")
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Shared queue of [`PriorityEntry`]s.
#[derive(Clone, Default)]
pub struct PriorityQueue {
    entries: Rc<RefCell<Vec<PriorityEntry>>>,
    next_seq: Rc<Cell<u64>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` to run in the next drain. `done` is set once it has run.
    pub fn push(&self, task: LocalBoxFuture<'static, ()>, priority: Priority, done: Event) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        tracing::trace!(priority, seq, "priority entry queued");
        self.entries.borrow_mut().push(PriorityEntry {
            task,
            priority,
            done,
            seq,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Runs every queued entry in ascending priority, then returns how many
    /// ran. Entries pushed while draining wait for the next drain.
    pub async fn drain(&self) -> usize {
        let mut batch = std::mem::take(&mut *self.entries.borrow_mut());
        batch.sort_by_key(|entry| (entry.priority, entry.seq));

        let count = batch.len();
        for entry in batch {
            entry.task.await;
            entry.done.set();
        }
        count
    }
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue").field("len", &self.len()).finish()
    }
}
