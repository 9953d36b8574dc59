//! # Cyclebench
//!
//! A cycle-settling cooperative testbench runtime for verifying simulated
//! digital circuits against software reference models.
//!
//! ## Design Principles
//!
//! - **Settle, then step**: the clock only advances once no task can make
//!   progress within the current cycle. Every wait on an [`Event`],
//!   [`Queue`] or [`Timer`] raises an activity flag the scheduler uses to
//!   detect that fixed point.
//! - **Deterministic model ordering**: model-side continuations are queued
//!   with a priority and drained in ascending order after settlement and
//!   before the DUT step.
//! - **Explicit wiring**: agents register their drivers and monitors
//!   through builders; attaching a model reconciles every operation with
//!   exactly one endpoint and rejects incomplete wiring up front.
//! - **Mismatches are observations**: the scoreboard records them, it
//!   never stops the clock.
//!
//! ## Features
//!
//! - `parallel` - Run independent regression sessions on a rayon pool
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use cyclebench::agent::{Agent, DriverBuilder};
//! use cyclebench::{BenchConfig, CountingDut, Env, Model};
//! use serde_json::json;
//!
//! let (out, stats) = cyclebench::run(BenchConfig::default(), |sched| async move {
//!     sched.start_clock(Rc::new(RefCell::new(CountingDut::new())))?;
//!
//!     let agent = Agent::builder("adder")
//!         .driver(
//!             DriverBuilder::new("add")
//!                 .params(&["a", "b"])
//!                 .build(|args| async move {
//!                     let sum = args["a"].as_i64()? + args["b"].as_i64()?;
//!                     Some(json!(sum))
//!                 })?,
//!         )
//!         .build(&sched)?;
//!     let env = Env::builder(&sched).agent(agent.clone()).build()?;
//!
//!     let model = Model::builder(&sched, "reference")
//!         .driver_hook("adder.add", |args| {
//!             Some(json!(args["a"].as_i64()? + args["b"].as_i64()?))
//!         })
//!         .build()?;
//!     env.attach(&model)?;
//!
//!     agent.drive("add", vec![json!(3), json!(4)], Default::default()).await
//! })
//! .unwrap();
//!
//! assert_eq!(out.unwrap(), Some(json!(7)));
//! assert_eq!(stats.compare.matched, 1);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use cyclebench::BenchConfig;
//!
//! let config = BenchConfig::from_yaml_file("bench.yaml")?;
//! let (result, stats) = cyclebench::run(config, |sched| async move { /* ... */ })?;
//! ```

pub mod types;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod config;
pub mod dut;
pub mod stats;
pub mod compare;
pub mod scheduler;
pub mod signature;
pub mod model;
pub mod agent;
pub mod executor;
pub mod reconcile;
pub mod env;
pub mod triggers;
pub mod delay;
pub mod regression;

use std::future::Future;

// Re-export commonly used types
pub use types::{Args, ClockTick, Priority, TaskId, Value, DEFAULT_PRIORITY, MAX_PRIORITY};
pub use error::{BenchError, BenchResult};
pub use runtime::{gather, yield_now, JoinHandle, Runtime, Spawner};
pub use sync::{ActivityFlag, Event, Queue, Timer};
pub use config::{
    BenchConfig, BenchConfigBuilder, BindingConfig, ConflictPolicy, EndpointKind, Precedence,
};
pub use dut::{CountingDut, Dut, Probe};
pub use stats::{BenchStats, StatsCollector, WallTimer};
pub use compare::{Comparator, CompareFn, Mismatch, Scoreboard};
pub use scheduler::Scheduler;
pub use signature::{Param, Signature};
pub use model::{EndpointPath, IntoEndpointPath, Model, ModelBuilder};
pub use agent::{Agent, AgentBuilder, DriverBuilder, MonitorBuilder, ScheduleOrder};
pub use executor::{Call, CallOptions, Executor, ExitPolicy, GroupResult};
pub use reconcile::{reconcile, DriverBinding, Wiring};
pub use env::{Env, EnvBuilder, EnvId};
pub use delay::Delayer;
pub use regression::{Regression, SessionReport};

/// Runs one testbench on a fresh runtime.
///
/// `test` receives the session's [`Scheduler`]; the future it returns is
/// driven to completion, followed by one trailing clock event if a clock
/// was started. Logging is set up from `simulation.log_level` unless a
/// global subscriber is already installed.
pub fn run<F, Fut>(config: BenchConfig, test: F) -> BenchResult<(Fut::Output, BenchStats)>
where
    F: FnOnce(Scheduler) -> Fut,
    Fut: Future + 'static,
    Fut::Output: 'static,
{
    init_logging(&config.simulation.log_level);
    let rt = Runtime::new();
    let sched = Scheduler::new(rt.spawner(), config);
    let future = test(sched.clone());
    sched.run(&rt, future)
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` overrides `level` when set. Returns `false` if a global
/// subscriber was already installed, in which case nothing changes.
///
/// # Example
///
/// ```rust,ignore
/// cyclebench::init_logging("cyclebench=debug");
/// ```
pub fn init_logging(level: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}
