//! Device-under-test contract.
//!
//! The DUT is an opaque stepping object. The scheduler owns the per-cycle
//! clock event, so a DUT only has to advance its own state when stepped.

use std::cell::Cell;
use std::rc::Rc;

/// A simulated circuit the scheduler steps once per settled cycle.
pub trait Dut {
    /// Advances the circuit by `cycles` clock cycles.
    fn step(&mut self, cycles: u64);

    /// Name used in logs.
    fn name(&self) -> &str {
        "dut"
    }
}

/// Anything that yields the current value of one signal.
pub trait Probe {
    fn value(&self) -> u64;
}

impl<F> Probe for F
where
    F: Fn() -> u64,
{
    fn value(&self) -> u64 {
        self()
    }
}

/// A DUT with no logic that only counts its steps.
///
/// Useful for stimulus-only tests and for benchmarking the scheduler.
#[derive(Clone, Debug, Default)]
pub struct CountingDut {
    steps: Rc<Cell<u64>>,
}

impl CountingDut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of cycles stepped.
    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    /// A probe that reads the step counter.
    pub fn probe(&self) -> impl Probe + 'static {
        let steps = self.steps.clone();
        move || steps.get()
    }
}

impl Dut for CountingDut {
    fn step(&mut self, cycles: u64) {
        self.steps.set(self.steps.get() + cycles);
    }

    fn name(&self) -> &str {
        "counting_dut"
    }
}
