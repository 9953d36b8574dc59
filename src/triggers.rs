//! Clock-aligned wait helpers over DUT signals.
//!
//! Each trigger samples its [`Probe`]s once per clock event, so a
//! condition that becomes true and false again within one cycle is never
//! seen.

use crate::dut::Probe;
use crate::scheduler::Scheduler;

/// Waits `cycles` clock events.
pub async fn clock_cycles(sched: &Scheduler, cycles: u64) {
    sched.clock_cycles(cycles).await;
}

/// Waits at least `delay` cycles, then until `probe` reads `expected`.
pub async fn value<P: Probe + ?Sized>(sched: &Scheduler, probe: &P, expected: u64, delay: u64) {
    sched.clock_cycles(delay).await;
    while probe.value() != expected {
        sched.step().await;
    }
}

/// Waits at least `delay` cycles, then until every probe is non-zero.
pub async fn all_valid(sched: &Scheduler, probes: &[&dyn Probe], delay: u64) {
    sched.clock_cycles(delay).await;
    while !probes.iter().all(|p| p.value() != 0) {
        sched.step().await;
    }
}

/// Waits at least `delay` cycles, then until `cond` holds.
pub async fn condition<F>(sched: &Scheduler, mut cond: F, delay: u64)
where
    F: FnMut() -> bool,
{
    sched.clock_cycles(delay).await;
    while !cond() {
        sched.step().await;
    }
}

/// Waits until `probe` differs from its value at the call.
pub async fn change<P: Probe + ?Sized>(sched: &Scheduler, probe: &P) {
    let old = probe.value();
    while probe.value() == old {
        sched.step().await;
    }
}

/// Waits for a cycle where `probe` reads non-zero after reading zero in
/// the previous cycle.
pub async fn rising_edge<P: Probe + ?Sized>(sched: &Scheduler, probe: &P) {
    let mut old = probe.value();
    while old != 0 || probe.value() == old {
        old = probe.value();
        sched.step().await;
    }
}

/// Waits for a cycle where `probe` reads zero after reading non-zero in
/// the previous cycle.
pub async fn falling_edge<P: Probe + ?Sized>(sched: &Scheduler, probe: &P) {
    let mut old = probe.value();
    while probe.value() != 0 || probe.value() == old {
        old = probe.value();
        sched.step().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::dut::CountingDut;
    use crate::runtime::Runtime;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (Runtime, Scheduler, CountingDut) {
        let rt = Runtime::new();
        let sched = Scheduler::new(rt.spawner(), BenchConfig::default());
        let dut = CountingDut::new();
        sched
            .start_clock(Rc::new(RefCell::new(dut.clone())))
            .unwrap();
        (rt, sched, dut)
    }

    #[test]
    fn test_value_waits_for_match() {
        let (rt, sched, dut) = setup();
        let probe = dut.probe();
        let s = sched.clone();
        let (tick, _) = sched
            .run(&rt, async move {
                value(&s, &probe, 4, 1).await;
                s.tick()
            })
            .unwrap();
        assert_eq!(tick, 4);
    }

    #[test]
    fn test_condition_honours_delay() {
        let (rt, sched, _dut) = setup();
        let s = sched.clone();
        let (tick, _) = sched
            .run(&rt, async move {
                condition(&s, || true, 3).await;
                s.tick()
            })
            .unwrap();
        assert_eq!(tick, 3);
    }

    #[test]
    fn test_all_valid() {
        let (rt, sched, dut) = setup();
        let steps = dut.probe();
        let even = move || u64::from(steps.value() % 2 == 0);
        let s = sched.clone();
        let (tick, _) = sched
            .run(&rt, async move {
                let counter = dut.probe();
                let probes: [&dyn Probe; 2] = [&counter, &even];
                all_valid(&s, &probes, 1).await;
                s.tick()
            })
            .unwrap();
        assert_eq!(tick, 2);
    }

    #[test]
    fn test_edges() {
        let (rt, sched, dut) = setup();
        let steps = dut.probe();
        // high on cycles 2 and 3 of every 4
        let pulse = move || u64::from(steps.value() % 4 >= 2);
        let s = sched.clone();
        let (ticks, _) = sched
            .run(&rt, async move {
                rising_edge(&s, &pulse).await;
                let rise = s.tick();
                falling_edge(&s, &pulse).await;
                let fall = s.tick();
                change(&s, &pulse).await;
                (rise, fall, s.tick())
            })
            .unwrap();
        assert_eq!(ticks, (2, 4, 6));
    }
}
