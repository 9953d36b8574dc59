//! Cycle timers.

use super::{ActivityFlag, RawEvent};
use crate::runtime::yield_now;

/// Waits a fixed number of clock cycles.
///
/// A zero-cycle timer suspends once without waiting for the clock, which
/// lets every other runnable task run first.
#[derive(Clone, Debug)]
pub struct Timer {
    clock: RawEvent,
    cycles: u64,
    activity: ActivityFlag,
}

impl Timer {
    /// Creates a timer over the given clock event.
    pub fn new(clock: RawEvent, cycles: u64, activity: ActivityFlag) -> Self {
        Self {
            clock,
            cycles,
            activity,
        }
    }

    /// Returns the number of cycles this timer waits.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Waits until the timer expires, then marks the settle pass active.
    pub async fn wait(&self) {
        if self.cycles == 0 {
            yield_now().await;
        } else {
            for _ in 0..self.cycles {
                self.clock.wait().await;
            }
        }
        self.activity.raise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn test_zero_cycle_timer() {
        let rt = Runtime::new();
        let flag = ActivityFlag::new();
        let timer = Timer::new(RawEvent::new(), 0, flag.clone());
        rt.block_on(async move { timer.wait().await }).unwrap();
        assert!(flag.is_raised());
    }

    #[test]
    fn test_timer_counts_clock_edges() {
        let rt = Runtime::new();
        let spawner = rt.spawner();
        let clock = RawEvent::new();
        let timer = Timer::new(clock.clone(), 3, ActivityFlag::new());

        let edges = rt
            .block_on(async move {
                let waiter = spawner.spawn(async move { timer.wait().await });
                let mut edges = 0;
                while !waiter.is_finished() {
                    yield_now().await;
                    clock.set();
                    clock.clear();
                    edges += 1;
                }
                edges
            })
            .unwrap();
        assert_eq!(edges, 3);
    }
}
