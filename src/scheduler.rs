//! Cycle-settling scheduler.
//!
//! The scheduler advances the DUT by exactly one cycle, and only once no
//! task can make further progress within the current cycle.
//!
//! # Settle-then-step
//!
//! The clock loop is itself a task named `clock_loop`. Each cycle it:
//!
//! 1. Settles: lowers the [`ActivityFlag`], yields once, and repeats while
//!    the flag was raised or any task other than itself is runnable.
//! 2. Drains the priority queue in ascending priority.
//! 3. Runs the before-step callbacks in registration order.
//! 4. Steps the DUT by one cycle and advances the tick.
//! 5. Sets and immediately clears the clock event, waking every task that
//!    waits on the clock.
//!
//! A task that never suspends keeps step 1 from ever finishing. That hang
//! is the caller's responsibility.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use crate::compare::Scoreboard;
use crate::config::BenchConfig;
use crate::dut::Dut;
use crate::error::{BenchError, BenchResult};
use crate::executor::priority::PriorityQueue;
use crate::runtime::{yield_now, JoinHandle, Runtime, Spawner};
use crate::stats::{BenchStats, SchedulerStats, StatsCollector};
use crate::sync::{ActivityFlag, Event, Queue, Timer};
use crate::types::{ClockTick, LocalBoxFuture, Priority, TaskId};

type StepCallback = Box<dyn FnMut(ClockTick)>;

struct SchedulerInner {
    spawner: Spawner,
    config: BenchConfig,
    activity: ActivityFlag,
    tick: Rc<Cell<ClockTick>>,
    clock: Event,
    priority: PriorityQueue,
    callbacks: RefCell<Vec<StepCallback>>,
    clock_task: Cell<Option<TaskId>>,
    clock_started: Cell<bool>,
    failure: RefCell<Option<BenchError>>,
    scoreboard: Scoreboard,
    stats: RefCell<SchedulerStats>,
}

/// Per-testbench scheduling context.
///
/// Cheap to clone. Every agent, executor and model task holds a clone and
/// reaches the clock, the priority queue and the scoreboard through it.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler spawning onto `spawner`.
    pub fn new(spawner: Spawner, config: BenchConfig) -> Self {
        let activity = ActivityFlag::new();
        let tick = Rc::new(Cell::new(0));
        let scoreboard = Scoreboard::with_clock(config.simulation.match_detail, tick.clone());

        Self {
            inner: Rc::new(SchedulerInner {
                spawner,
                clock: Event::new(activity.clone()),
                activity,
                tick,
                config,
                priority: PriorityQueue::new(),
                callbacks: RefCell::new(Vec::new()),
                clock_task: Cell::new(None),
                clock_started: Cell::new(false),
                failure: RefCell::new(None),
                scoreboard,
                stats: RefCell::new(SchedulerStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.inner.config
    }

    pub fn spawner(&self) -> Spawner {
        self.inner.spawner.clone()
    }

    /// Spawns a named task.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.inner.spawner.spawn_named(name, future)
    }

    pub fn activity(&self) -> ActivityFlag {
        self.inner.activity.clone()
    }

    /// Creates an event wired to this scheduler's activity flag.
    pub fn event(&self) -> Event {
        Event::new(self.activity())
    }

    /// Creates a queue wired to this scheduler's activity flag.
    pub fn queue<T>(&self) -> Queue<T> {
        Queue::new(self.activity())
    }

    /// Creates a timer over the clock event.
    pub fn timer(&self, cycles: u64) -> Timer {
        Timer::new(self.inner.clock.raw().clone(), cycles, self.activity())
    }

    /// The per-cycle clock event. Set and cleared once per step.
    pub fn clock_event(&self) -> Event {
        self.inner.clock.clone()
    }

    /// Waits `cycles` clock cycles.
    pub async fn clock_cycles(&self, cycles: u64) {
        self.timer(cycles).wait().await;
    }

    /// Waits for the next clock event.
    pub async fn step(&self) {
        self.inner.clock.wait().await;
    }

    /// Number of cycles stepped so far.
    pub fn tick(&self) -> ClockTick {
        self.inner.tick.get()
    }

    pub fn scoreboard(&self) -> Scoreboard {
        self.inner.scoreboard.clone()
    }

    pub fn priority_queue(&self) -> &PriorityQueue {
        &self.inner.priority
    }

    /// Queues a model-side continuation for this cycle's priority drain.
    pub fn add_priority_task(
        &self,
        task: LocalBoxFuture<'static, ()>,
        priority: Priority,
        done: Event,
    ) {
        self.inner.priority.push(task, priority, done);
    }

    /// Registers a callback run after the priority drain and before every
    /// DUT step, with the tick about to be stepped.
    pub fn on_before_step<F>(&self, callback: F)
    where
        F: FnMut(ClockTick) + 'static,
    {
        self.inner.callbacks.borrow_mut().push(Box::new(callback));
    }

    /// Returns true while the clock loop is running.
    pub fn is_clock_running(&self) -> bool {
        self.inner.clock_task.get().is_some()
    }

    /// Starts the clock loop over `dut`.
    pub fn start_clock<D>(&self, dut: Rc<RefCell<D>>) -> BenchResult<()>
    where
        D: Dut + 'static,
    {
        if self.inner.clock_started.replace(true) {
            return Err(BenchError::ClockAlreadyStarted);
        }

        tracing::debug!(dut = dut.borrow().name(), "clock started");
        let this = self.clone();
        let handle = self.spawn("clock_loop", async move { this.clock_loop(dut).await });
        self.inner.clock_task.set(Some(handle.id()));
        Ok(())
    }

    async fn clock_loop<D: Dut>(self, dut: Rc<RefCell<D>>) {
        loop {
            self.settle().await;

            let drained = self.inner.priority.drain().await;
            let callbacks_run = self.run_callbacks();

            let tick = self.tick();
            if let Some(limit) = self.inner.config.simulation.max_cycles {
                if tick >= limit {
                    tracing::error!(tick, limit, "cycle limit exceeded, stopping clock");
                    self.inner
                        .failure
                        .borrow_mut()
                        .get_or_insert(BenchError::CycleLimitExceeded { tick, limit });
                    self.inner.clock_task.set(None);
                    return;
                }
            }

            dut.borrow_mut().step(1);
            self.inner.tick.set(tick + 1);
            {
                let mut stats = self.inner.stats.borrow_mut();
                stats.priority_drained += drained as u64;
                stats.callbacks_run += callbacks_run as u64;
            }
            tracing::trace!(tick = tick + 1, drained, "cycle stepped");

            self.inner.clock.set();
            self.inner.clock.clear();
        }
    }

    /// Yields until a full pass sees no activity and nothing else runnable.
    async fn settle(&self) {
        let me = self.inner.clock_task.get();
        loop {
            self.inner.activity.clear();
            yield_now().await;
            self.inner.stats.borrow_mut().settle_passes += 1;

            let runnable = match me {
                Some(id) => self.inner.spawner.has_runnable_except(id),
                None => self.inner.spawner.runnable_count() > 0,
            };
            if !self.inner.activity.is_raised() && !runnable {
                break;
            }
        }
    }

    fn run_callbacks(&self) -> usize {
        let tick = self.tick();
        let mut callbacks = std::mem::take(&mut *self.inner.callbacks.borrow_mut());
        for callback in callbacks.iter_mut() {
            callback(tick);
        }
        let count = callbacks.len();

        // Keep callbacks registered from inside a callback, after the old ones
        let mut slot = self.inner.callbacks.borrow_mut();
        callbacks.append(&mut slot);
        *slot = callbacks;
        count
    }

    /// Snapshot of the scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.inner.stats.borrow().clone();
        stats.cycles = self.tick();
        stats.tasks_spawned = self.inner.spawner.spawned_count();
        stats.polls = self.inner.spawner.poll_count();
        stats
    }

    /// Takes the error that stopped the clock, if any.
    pub fn take_failure(&self) -> Option<BenchError> {
        self.inner.failure.borrow_mut().take()
    }

    /// Drives `test` to completion on `rt`.
    ///
    /// If the clock is running, one more clock event is awaited afterwards
    /// so that work issued during the last cycle finishes. A clock stopped
    /// by the cycle watchdog fails the run even if `test` completed.
    pub fn run<F>(&self, rt: &Runtime, test: F) -> BenchResult<(F::Output, BenchStats)>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let mut collector = StatsCollector::new(self.inner.config.simulation.name.clone());
        collector.start();

        let this = self.clone();
        let result = rt.block_on(async move {
            let output = test.await;
            if this.is_clock_running() {
                this.clock_event().wait().await;
            }
            output
        });

        if let Some(failure) = self.take_failure() {
            return Err(failure);
        }
        let output = result?;

        collector.stop(self.stats(), self.inner.scoreboard.stats());
        let stats = collector.into_stats();
        for line in stats.summary().lines().filter(|l| !l.is_empty()) {
            tracing::info!("{}", line);
        }
        Ok((output, stats))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.tick())
            .field("clock_running", &self.is_clock_running())
            .field("priority_pending", &self.inner.priority.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut::{CountingDut, Probe};

    fn setup() -> (Runtime, Scheduler, Rc<RefCell<CountingDut>>) {
        let rt = Runtime::new();
        let sched = Scheduler::new(rt.spawner(), BenchConfig::default());
        let dut = Rc::new(RefCell::new(CountingDut::new()));
        (rt, sched, dut)
    }

    #[test]
    fn test_clock_cycles_advance_tick() {
        let (rt, sched, dut) = setup();
        sched.start_clock(dut.clone()).unwrap();

        let s = sched.clone();
        let (tick, _) = sched
            .run(&rt, async move {
                s.clock_cycles(5).await;
                s.tick()
            })
            .unwrap();

        assert_eq!(tick, 5);
        // One extra cycle for the trailing clock event
        assert_eq!(dut.borrow().steps(), 6);
    }

    #[test]
    fn test_start_clock_twice() {
        let (_rt, sched, dut) = setup();
        sched.start_clock(dut.clone()).unwrap();
        assert!(matches!(
            sched.start_clock(dut),
            Err(BenchError::ClockAlreadyStarted)
        ));
    }

    #[test]
    fn test_no_clock_stalls() {
        let (rt, sched, _dut) = setup();
        let s = sched.clone();
        let result = sched.run(&rt, async move { s.clock_cycles(1).await });
        assert!(matches!(result, Err(BenchError::Stalled)));
    }

    #[test]
    fn test_settles_before_step() {
        let (rt, sched, dut) = setup();
        sched.start_clock(dut.clone()).unwrap();

        let s = sched.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        sched
            .run(&rt, async move {
                s.clock_cycles(1).await;
                let queue = s.queue::<u32>();
                let consumer = {
                    let queue = queue.clone();
                    let log = log.clone();
                    let sched = s.clone();
                    s.spawn("consumer", async move {
                        for _ in 0..3 {
                            let item = queue.get().await;
                            log.borrow_mut().push((item, sched.tick()));
                        }
                    })
                };
                for i in 0..3 {
                    queue.put(i);
                    yield_now().await;
                }
                consumer.await;
            })
            .unwrap();

        // Every hand-off happened inside the same cycle
        assert_eq!(*seen.borrow(), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn test_priority_drained_before_step() {
        let (rt, sched, dut) = setup();
        sched.start_clock(dut.clone()).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let s = sched.clone();
        let l = log.clone();
        let probe = dut.borrow().probe();
        sched
            .run(&rt, async move {
                let mut done = Vec::new();
                for prio in [5u8, 1, 9] {
                    let event = s.event();
                    let l = l.clone();
                    let steps = dut.borrow().probe();
                    s.add_priority_task(
                        Box::pin(async move {
                            l.borrow_mut().push((prio, steps.value()));
                        }),
                        prio,
                        event.clone(),
                    );
                    done.push(event);
                }
                for event in done {
                    event.wait().await;
                }
            })
            .unwrap();

        assert!(probe.value() >= 1);
        assert_eq!(*log.borrow(), vec![(1, 0), (5, 0), (9, 0)]);
    }

    #[test]
    fn test_before_step_callbacks_in_order() {
        let (rt, sched, dut) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let l = log.clone();
            sched.on_before_step(move |tick| l.borrow_mut().push((tag, tick)));
        }
        sched.start_clock(dut).unwrap();

        let s = sched.clone();
        sched.run(&rt, async move { s.clock_cycles(1).await }).unwrap();

        let log = log.borrow();
        assert_eq!(&log[..2], &[("first", 0), ("second", 0)]);
    }

    #[test]
    fn test_cycle_limit() {
        let rt = Runtime::new();
        let config = crate::config::BenchConfigBuilder::new()
            .max_cycles(3)
            .build()
            .unwrap();
        let sched = Scheduler::new(rt.spawner(), config);
        sched
            .start_clock(Rc::new(RefCell::new(CountingDut::new())))
            .unwrap();

        let s = sched.clone();
        let result = sched.run(&rt, async move { s.clock_cycles(10).await });
        assert!(matches!(
            result,
            Err(BenchError::CycleLimitExceeded { tick: 3, limit: 3 })
        ));
    }

    #[test]
    fn test_stats_snapshot() {
        let (rt, sched, dut) = setup();
        sched.start_clock(dut).unwrap();
        let s = sched.clone();
        let (_, stats) = sched.run(&rt, async move { s.clock_cycles(4).await }).unwrap();
        assert_eq!(stats.scheduler.cycles, 5);
        assert!(stats.scheduler.settle_passes >= 5);
        assert!(stats.scheduler.tasks_spawned >= 2);
    }
}
