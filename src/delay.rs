//! Delayed view of a signal.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::dut::Probe;
use crate::scheduler::Scheduler;

/// Reports the value a probe had `delay` cycles ago.
///
/// The probe is sampled once per cycle, after the priority drain and
/// before the DUT step. Until `delay + 1` samples exist the value is
/// `None`.
#[derive(Clone)]
pub struct Delayer {
    delay: usize,
    samples: Rc<RefCell<VecDeque<u64>>>,
}

impl Delayer {
    pub fn new<P>(sched: &Scheduler, probe: P, delay: usize) -> Self
    where
        P: Probe + 'static,
    {
        let samples = Rc::new(RefCell::new(VecDeque::with_capacity(delay + 1)));
        let sink = samples.clone();
        sched.on_before_step(move |_| {
            let mut samples = sink.borrow_mut();
            if samples.len() > delay {
                samples.pop_front();
            }
            samples.push_back(probe.value());
        });
        Self { delay, samples }
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    pub fn value(&self) -> Option<u64> {
        let samples = self.samples.borrow();
        if samples.len() == self.delay + 1 {
            samples.front().copied()
        } else {
            None
        }
    }
}

impl fmt::Debug for Delayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delayer")
            .field("delay", &self.delay)
            .field("value", &self.value())
            .finish()
    }
}
