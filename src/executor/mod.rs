//! Priority executor for batches of operations issued within one cycle.
//!
//! Calls are collected into schedule groups. Calls sharing a group run
//! strictly in submission order; distinct groups run as separate tasks
//! and interleave freely.
//!
//! # Exit policies
//!
//! - [`ExitPolicy::All`]: `execute` waits for every group and returns the
//!   results keyed by group name. A group with one call maps to
//!   [`GroupResult::Single`], larger groups to [`GroupResult::Many`].
//! - [`ExitPolicy::None`]: `execute` launches every group and returns at
//!   once; [`Executor::wait_all`] joins them later.
//! - [`ExitPolicy::Any`]: `execute` returns once the first group finishes;
//!   the other groups keep running until `wait_all` joins them.
//!
//! Only driver calls may carry a priority or a schedule order. Setting
//! either on a plain task is rejected by [`Executor::call`] immediately.

pub mod priority;

use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use priority::{PriorityEntry, PriorityQueue};

use crate::agent::{Driver, ScheduleOrder};
use crate::error::{BenchError, BenchResult};
use crate::runtime::JoinHandle;
use crate::scheduler::Scheduler;
use crate::sync::Event;
use crate::types::{Args, LocalBoxFuture, Priority, Value, MAX_PRIORITY};

/// When [`Executor::execute`] returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    #[default]
    All,
    None,
    Any,
}

impl FromStr for ExitPolicy {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            "any" => Ok(Self::Any),
            other => Err(BenchError::InvalidExitPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for ExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::None => "none",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

enum CallKind {
    Driver { driver: Rc<Driver>, args: Args },
    Task(LocalBoxFuture<'static, Option<Value>>),
}

/// One operation submitted to an executor.
///
/// Driver calls come from [`Agent::call`](crate::agent::Agent::call); any
/// other future can be wrapped with [`Call::task`].
pub struct Call {
    name: String,
    kind: CallKind,
}

impl Call {
    /// Wraps an arbitrary future.
    pub fn task<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Option<Value>> + 'static,
    {
        Self {
            name: name.into(),
            kind: CallKind::Task(Box::pin(future)),
        }
    }

    pub(crate) fn driver(driver: Rc<Driver>, args: Args) -> Self {
        Self {
            name: driver.descriptor().name().to_string(),
            kind: CallKind::Driver { driver, args },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_driver(&self) -> bool {
        matches!(self.kind, CallKind::Driver { .. })
    }

    /// `agent.driver` for driver calls, the task name otherwise.
    fn default_group(&self) -> String {
        match &self.kind {
            CallKind::Driver { driver, .. } => format!("{}.{}", driver.agent(), self.name),
            CallKind::Task(_) => self.name.clone(),
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("name", &self.name)
            .field("driver", &self.is_driver())
            .finish()
    }
}

/// Per-call scheduling options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub priority: Option<Priority>,
    pub schedule_order: Option<ScheduleOrder>,
    pub schedule_group: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn schedule_order(mut self, order: ScheduleOrder) -> Self {
        self.schedule_order = Some(order);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.schedule_group = Some(group.into());
        self
    }
}

/// Result of one schedule group.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupResult {
    Single(Option<Value>),
    Many(Vec<Option<Value>>),
}

impl GroupResult {
    fn from_outputs(mut outputs: Vec<Option<Value>>) -> Self {
        if outputs.len() == 1 {
            Self::Single(outputs.pop().flatten())
        } else {
            Self::Many(outputs)
        }
    }

    /// The value of a single-call group.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Single(value) => value.as_ref(),
            Self::Many(_) => None,
        }
    }

    /// Every value of the group, in submission order.
    pub fn values(&self) -> Vec<Option<&Value>> {
        match self {
            Self::Single(value) => vec![value.as_ref()],
            Self::Many(values) => values.iter().map(Option::as_ref).collect(),
        }
    }
}

struct PendingCall {
    call: Call,
    priority: Option<Priority>,
    order: Option<ScheduleOrder>,
}

#[derive(Clone, Copy)]
struct Defaults {
    priority: Priority,
    order: ScheduleOrder,
}

async fn run_group(
    calls: Vec<PendingCall>,
    defaults: Defaults,
    complete: Option<Event>,
) -> Vec<Option<Value>> {
    let mut outputs = Vec::with_capacity(calls.len());
    for pending in calls {
        let output = match pending.call.kind {
            CallKind::Driver { driver, args } => {
                let desc = driver.descriptor();
                let priority = pending
                    .priority
                    .or(desc.priority())
                    .unwrap_or(defaults.priority);
                let order = pending
                    .order
                    .or(desc.schedule_order())
                    .unwrap_or(defaults.order);
                driver.process(args, order, priority).await
            }
            CallKind::Task(future) => future.await,
        };
        outputs.push(output);
    }

    if let Some(event) = complete {
        if !event.is_set() {
            event.set();
        }
    }
    outputs
}

/// Runs a batch of calls to a declared [`ExitPolicy`].
pub struct Executor {
    sched: Scheduler,
    policy: ExitPolicy,
    defaults: Defaults,
    groups: IndexMap<String, Vec<PendingCall>>,
    launched: Vec<(String, JoinHandle<Vec<Option<Value>>>)>,
    results: IndexMap<String, GroupResult>,
    any_done: Event,
}

impl Executor {
    pub fn new(sched: &Scheduler, policy: ExitPolicy) -> Self {
        let params = &sched.config().executor;
        Self {
            sched: sched.clone(),
            policy,
            defaults: Defaults {
                priority: params.default_priority,
                order: params.default_schedule_order,
            },
            groups: IndexMap::new(),
            launched: Vec::new(),
            results: IndexMap::new(),
            any_done: sched.event(),
        }
    }

    /// Creates an executor with the configured exit policy.
    pub fn from_config(sched: &Scheduler) -> Self {
        Self::new(sched, sched.config().executor.exit_policy)
    }

    pub fn policy(&self) -> ExitPolicy {
        self.policy
    }

    /// Number of calls submitted but not yet launched.
    pub fn pending(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Submits a call.
    pub fn call(&mut self, call: Call, options: CallOptions) -> BenchResult<()> {
        if let Some(priority) = options.priority {
            if priority > MAX_PRIORITY {
                return Err(BenchError::PriorityOutOfRange(priority));
            }
            if !call.is_driver() {
                return Err(BenchError::NotADriver {
                    name: call.name.clone(),
                    option: "priority",
                });
            }
        }
        if options.schedule_order.is_some() && !call.is_driver() {
            return Err(BenchError::NotADriver {
                name: call.name.clone(),
                option: "schedule_order",
            });
        }

        let group = options
            .schedule_group
            .unwrap_or_else(|| call.default_group());
        self.groups.entry(group).or_default().push(PendingCall {
            call,
            priority: options.priority,
            order: options.schedule_order,
        });
        Ok(())
    }

    fn launch(&mut self, complete: Option<Event>) -> Vec<(String, JoinHandle<Vec<Option<Value>>>)> {
        let defaults = self.defaults;
        std::mem::take(&mut self.groups)
            .into_iter()
            .map(|(group, calls)| {
                tracing::debug!(group = %group, calls = calls.len(), "launch schedule group");
                let handle = self.sched.spawn(
                    format!("group:{group}"),
                    run_group(calls, defaults, complete.clone()),
                );
                (group, handle)
            })
            .collect()
    }

    /// Runs every submitted call according to the exit policy.
    ///
    /// Returns the results map for [`ExitPolicy::All`] and an empty map
    /// otherwise.
    pub async fn execute(&mut self) -> IndexMap<String, GroupResult> {
        match self.policy {
            ExitPolicy::All => {
                let launched = self.launch(None);
                let mut results = IndexMap::new();
                for (group, handle) in launched {
                    results.insert(group, GroupResult::from_outputs(handle.await));
                }
                self.results = results.clone();
                results
            }
            ExitPolicy::None => {
                let launched = self.launch(None);
                self.launched.extend(launched);
                IndexMap::new()
            }
            ExitPolicy::Any => {
                self.any_done.clear();
                let launched = self.launch(Some(self.any_done.clone()));
                let wait = !launched.is_empty();
                self.launched.extend(launched);
                if wait {
                    self.any_done.wait().await;
                }
                IndexMap::new()
            }
        }
    }

    /// Joins every group launched by a non-blocking `execute`.
    pub async fn wait_all(&mut self) -> &IndexMap<String, GroupResult> {
        let launched = std::mem::take(&mut self.launched);
        if !launched.is_empty() {
            let mut results = IndexMap::new();
            for (group, handle) in launched {
                results.insert(group, GroupResult::from_outputs(handle.await));
            }
            self.results = results;
        }
        &self.results
    }

    /// Results of the last completed `execute` or `wait_all`.
    pub fn results(&self) -> &IndexMap<String, GroupResult> {
        &self.results
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("policy", &self.policy)
            .field("pending", &self.pending())
            .field("launched", &self.launched.len())
            .field("results", &self.results.len())
            .finish()
    }
}
