//! Task-activity synchronization primitives.
//!
//! Each primitive here owns a plain inner primitive plus an
//! [`ActivityFlag`] handle. Whenever a wait completes (or an item is put
//! into a queue) the flag is raised, which tells the cycle-settling
//! scheduler that the current settle pass made progress.
//!
//! - [`Event`]: set/clear flag with any number of waiters
//! - [`Queue`]: unbounded FIFO channel
//! - [`Timer`]: wait a number of clock cycles

pub mod event;
pub mod queue;
pub mod timer;

use std::cell::Cell;
use std::rc::Rc;

pub use event::{Event, RawEvent};
pub use queue::{Queue, RawQueue};
pub use timer::Timer;

/// Shared "something happened in this settle pass" flag.
///
/// Owned by the scheduler, which is the only component that clears it.
#[derive(Clone, Debug, Default)]
pub struct ActivityFlag {
    raised: Rc<Cell<bool>>,
    count: Rc<Cell<u64>>,
}

impl ActivityFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the current settle pass as active.
    pub fn raise(&self) {
        self.raised.set(true);
        self.count.set(self.count.get() + 1);
    }

    /// Lowers the flag at the start of a settle pass.
    pub(crate) fn clear(&self) {
        self.raised.set(false);
    }

    /// Returns true if a wrapped wait completed since the last clear.
    pub fn is_raised(&self) -> bool {
        self.raised.get()
    }

    /// Total number of times the flag was raised.
    pub fn raise_count(&self) -> u64 {
        self.count.get()
    }
}
