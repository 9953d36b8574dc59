//! Agents: named collections of driver and monitor operations.
//!
//! An agent is built from an explicit registration table of
//! [`Operation`]s. Each operation is described once by a
//! [`DriverBuilder`] or [`MonitorBuilder`]; the agent turns descriptors into
//! runtime [`Driver`]s and [`Monitor`]s and starts every monitor's polling
//! task right away.
//!
//! # Example
//!
//! ```
//! use cyclebench::agent::{Agent, DriverBuilder, MonitorBuilder};
//! use cyclebench::{BenchConfig, Runtime, Scheduler};
//!
//! let rt = Runtime::new();
//! let sched = Scheduler::new(rt.spawner(), BenchConfig::default());
//!
//! let agent = Agent::builder("adder")
//!     .driver(
//!         DriverBuilder::new("add")
//!             .params(&["a", "b"])
//!             .build(|_args| async { None })
//!             .unwrap(),
//!     )
//!     .monitor(MonitorBuilder::new("sum").build(|| async { None }))
//!     .build(&sched)
//!     .unwrap();
//!
//! assert_eq!(agent.driver_names(), vec!["add"]);
//! assert_eq!(agent.monitor_size("sum").unwrap(), 0);
//! ```

pub mod driver;
pub mod monitor;

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

pub use driver::{port_payload, Driver, DriverBuilder, DriverDescriptor, DriverFn, ScheduleOrder};
pub use monitor::{Monitor, MonitorBuilder, MonitorDescriptor, MonitorFn};

use crate::error::{BenchError, BenchResult};
use crate::executor::Call;
use crate::scheduler::Scheduler;
use crate::types::{Args, Value, DEFAULT_PRIORITY};

/// One entry of an agent's registration table.
#[derive(Clone, Debug)]
pub enum Operation {
    Driver(DriverDescriptor),
    Monitor(MonitorDescriptor),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Self::Driver(desc) => desc.name(),
            Self::Monitor(desc) => desc.name(),
        }
    }
}

impl From<DriverDescriptor> for Operation {
    fn from(desc: DriverDescriptor) -> Self {
        Self::Driver(desc)
    }
}

impl From<MonitorDescriptor> for Operation {
    fn from(desc: MonitorDescriptor) -> Self {
        Self::Monitor(desc)
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    name: String,
    operations: Vec<Operation>,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    pub fn driver(self, desc: DriverDescriptor) -> Self {
        self.operation(desc)
    }

    pub fn monitor(self, desc: MonitorDescriptor) -> Self {
        self.operation(desc)
    }

    pub fn operation(mut self, op: impl Into<Operation>) -> Self {
        self.operations.push(op.into());
        self
    }

    /// Registers every operation and starts the monitors.
    pub fn build(self, sched: &Scheduler) -> BenchResult<Agent> {
        if self.name.is_empty() || self.name.contains('.') {
            return Err(BenchError::MalformedPath(self.name));
        }

        let mut names = HashSet::new();
        let mut match_names = HashSet::new();
        for op in &self.operations {
            if !names.insert(op.name().to_string()) {
                return Err(BenchError::Duplicate {
                    kind: "operation",
                    name: format!("{}.{}", self.name, op.name()),
                });
            }
            let match_name = match op {
                Operation::Driver(desc) => desc.match_name(),
                Operation::Monitor(desc) => desc.match_name(),
            };
            if !match_names.insert(match_name.to_string()) {
                return Err(BenchError::Duplicate {
                    kind: "match name",
                    name: format!("{}.{}", self.name, match_name),
                });
            }
        }

        let mut drivers = IndexMap::new();
        let mut monitors = IndexMap::new();
        for op in self.operations {
            match op {
                Operation::Driver(desc) => {
                    let name = desc.name().to_string();
                    drivers.insert(name, Rc::new(Driver::new(&self.name, desc, sched.clone())));
                }
                Operation::Monitor(desc) => {
                    let name = desc.name().to_string();
                    let monitor = Rc::new(Monitor::new(&self.name, desc, sched));
                    monitor.start(sched);
                    monitors.insert(name, monitor);
                }
            }
        }

        tracing::debug!(
            agent = %self.name,
            drivers = drivers.len(),
            monitors = monitors.len(),
            "agent built"
        );
        Ok(Agent {
            inner: Rc::new(AgentInner {
                name: self.name,
                drivers,
                monitors,
            }),
        })
    }
}

struct AgentInner {
    name: String,
    drivers: IndexMap<String, Rc<Driver>>,
    monitors: IndexMap<String, Rc<Monitor>>,
}

/// A named set of drivers and monitors. Cheap to clone.
#[derive(Clone)]
pub struct Agent {
    inner: Rc<AgentInner>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn driver_names(&self) -> Vec<&str> {
        self.inner.drivers.keys().map(String::as_str).collect()
    }

    pub fn monitor_names(&self) -> Vec<&str> {
        self.inner.monitors.keys().map(String::as_str).collect()
    }

    pub fn driver(&self, name: &str) -> BenchResult<&Rc<Driver>> {
        self.inner
            .drivers
            .get(name)
            .ok_or_else(|| self.unknown("driver", name))
    }

    pub fn monitor_handle(&self, name: &str) -> BenchResult<&Rc<Monitor>> {
        self.inner
            .monitors
            .get(name)
            .ok_or_else(|| self.unknown("monitor", name))
    }

    pub(crate) fn drivers(&self) -> impl Iterator<Item = &Rc<Driver>> {
        self.inner.drivers.values()
    }

    pub(crate) fn monitors(&self) -> impl Iterator<Item = &Rc<Monitor>> {
        self.inner.monitors.values()
    }

    fn unknown(&self, kind: &'static str, name: &str) -> BenchError {
        BenchError::UnknownOperation {
            agent: self.inner.name.clone(),
            kind,
            name: name.to_string(),
        }
    }

    /// Invokes a driver directly, outside any executor.
    ///
    /// Uses the driver's declared schedule order (parallel if none) and
    /// priority (99 if none).
    pub async fn drive(
        &self,
        name: &str,
        positional: Vec<Value>,
        named: Args,
    ) -> BenchResult<Option<Value>> {
        let driver = self.driver(name)?.clone();
        let args = driver.bind_args(positional, named)?;
        let desc = driver.descriptor();
        let order = desc.schedule_order().unwrap_or(ScheduleOrder::Parallel);
        let priority = desc.priority().unwrap_or(DEFAULT_PRIORITY);
        Ok(driver.process(args, order, priority).await)
    }

    /// Prepares a driver call for an [`Executor`](crate::executor::Executor).
    ///
    /// Arguments are bound now, so binding errors surface before execution.
    pub fn call(&self, name: &str, positional: Vec<Value>, named: Args) -> BenchResult<Call> {
        let driver = self.driver(name)?.clone();
        let args = driver.bind_args(positional, named)?;
        Ok(Call::driver(driver, args))
    }

    /// Waits for the next observation of a monitor.
    pub async fn monitor(&self, name: &str) -> BenchResult<Value> {
        let results = self.monitor_handle(name)?.results().clone();
        Ok(results.get().await)
    }

    /// Takes the next observation of a monitor if one is queued.
    pub fn try_monitor(&self, name: &str) -> BenchResult<Option<Value>> {
        Ok(self.monitor_handle(name)?.results().try_get())
    }

    /// Number of unconsumed observations of a monitor.
    pub fn monitor_size(&self, name: &str) -> BenchResult<usize> {
        Ok(self.monitor_handle(name)?.queue_size())
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.inner.name)
            .field("drivers", &self.driver_names())
            .field("monitors", &self.monitor_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::dut::CountingDut;
    use crate::env::Env;
    use crate::model::Model;
    use crate::runtime::Runtime;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    fn setup() -> (Runtime, Scheduler) {
        let rt = Runtime::new();
        let sched = Scheduler::new(rt.spawner(), BenchConfig::default());
        (rt, sched)
    }

    fn noop_driver(name: &str) -> DriverDescriptor {
        DriverBuilder::new(name)
            .params(&["a"])
            .build(|args| async move { Some(args["a"].clone()) })
            .unwrap()
    }

    #[test]
    fn test_duplicate_operation() {
        let (_rt, sched) = setup();
        let result = Agent::builder("a")
            .driver(noop_driver("op"))
            .monitor(MonitorBuilder::new("op").build(|| async { None }))
            .build(&sched);
        assert!(matches!(result, Err(BenchError::Duplicate { kind: "operation", .. })));
    }

    #[test]
    fn test_duplicate_match_name() {
        let (_rt, sched) = setup();
        let other = DriverBuilder::new("other")
            .match_name("op")
            .build(|_| async { None })
            .unwrap();
        let result = Agent::builder("a")
            .driver(noop_driver("op"))
            .driver(other)
            .build(&sched);
        assert!(matches!(result, Err(BenchError::Duplicate { kind: "match name", .. })));
    }

    #[test]
    fn test_bad_agent_name() {
        let (_rt, sched) = setup();
        assert!(matches!(
            Agent::builder("a.b").build(&sched),
            Err(BenchError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_unknown_operation() {
        let (_rt, sched) = setup();
        let agent = Agent::builder("a").driver(noop_driver("op")).build(&sched).unwrap();
        assert!(matches!(
            agent.call("missing", vec![], Args::new()),
            Err(BenchError::UnknownOperation { kind: "driver", .. })
        ));
        assert!(matches!(
            agent.monitor_size("op"),
            Err(BenchError::UnknownOperation { kind: "monitor", .. })
        ));
        assert!(matches!(
            agent.call("op", vec![json!(1), json!(2)], Args::new()),
            Err(BenchError::TooManyArguments { .. })
        ));
    }

    #[test]
    fn test_drive_without_models() {
        let (rt, sched) = setup();
        sched
            .start_clock(Rc::new(RefCell::new(CountingDut::new())))
            .unwrap();
        let agent = Agent::builder("a").driver(noop_driver("op")).build(&sched).unwrap();

        let a = agent.clone();
        let (out, _) = sched
            .run(&rt, async move { a.drive("op", vec![json!(5)], Args::new()).await })
            .unwrap();
        assert_eq!(out.unwrap(), Some(json!(5)));
    }

    #[test]
    fn test_monitor_collects_in_order() {
        let (rt, sched) = setup();
        sched
            .start_clock(Rc::new(RefCell::new(CountingDut::new())))
            .unwrap();

        let counter = Rc::new(Cell::new(0u64));
        let c = counter.clone();
        let agent = Agent::builder("a")
            .monitor(
                MonitorBuilder::new("count")
                    .no_model()
                    .build(move || {
                        let n = c.get();
                        c.set(n + 1);
                        async move { (n % 2 == 0).then(|| json!(n)) }
                    }),
            )
            .build(&sched)
            .unwrap();

        let a = agent.clone();
        let s = sched.clone();
        let (seen, _) = sched
            .run(&rt, async move {
                s.clock_cycles(6).await;
                let mut seen = Vec::new();
                for _ in 0..3 {
                    seen.push(a.monitor("count").await.unwrap());
                }
                seen
            })
            .unwrap();

        assert_eq!(seen, vec![json!(0), json!(2), json!(4)]);
    }

    #[test]
    fn test_monitor_skips_null_model_value() {
        let (rt, sched) = setup();
        sched
            .start_clock(Rc::new(RefCell::new(CountingDut::new())))
            .unwrap();

        let counter = Rc::new(Cell::new(0u64));
        let c = counter.clone();
        let agent = Agent::builder("a")
            .monitor(MonitorBuilder::new("count").build(move || {
                let n = c.get();
                c.set(n + 1);
                async move { Some(json!(n)) }
            }))
            .build(&sched)
            .unwrap();
        let env = Env::builder(&sched).agent(agent).build().unwrap();
        let model = Model::builder(&sched, "ref").monitor_port("a.count").build().unwrap();
        env.attach(&model).unwrap();

        let expected = model.monitor_port("a.count").unwrap();
        for value in [json!(0), Value::Null, json!(2)] {
            expected.put(value);
        }

        let s = sched.clone();
        sched
            .run(&rt, async move { s.clock_cycles(4).await })
            .unwrap();

        let board = sched.scoreboard();
        assert_eq!(board.matched(), 2);
        assert_eq!(board.skipped(), 1);
        assert_eq!(board.mismatched(), 0);
    }
}
