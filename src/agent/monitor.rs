//! Monitors: per-cycle observation with model comparison.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::compare::CompareFn;
use crate::model::ModelId;
use crate::scheduler::Scheduler;
use crate::sync::Queue;
use crate::types::{LocalBoxFuture, Value};

/// DUT-side body of a monitor, called once per cycle.
pub type MonitorFn = Rc<dyn Fn() -> LocalBoxFuture<'static, Option<Value>>>;

/// Immutable description of one monitor operation.
#[derive(Clone)]
pub struct MonitorDescriptor {
    name: String,
    match_name: Option<String>,
    compare: Option<CompareFn>,
    no_model: bool,
    func: MonitorFn,
}

impl MonitorDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_name(&self) -> &str {
        self.match_name.as_deref().unwrap_or(&self.name)
    }

    pub fn no_model(&self) -> bool {
        self.no_model
    }
}

impl fmt::Debug for MonitorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorDescriptor")
            .field("name", &self.name)
            .field("match_name", &self.match_name())
            .field("no_model", &self.no_model)
            .finish()
    }
}

/// Builder for [`MonitorDescriptor`].
pub struct MonitorBuilder {
    name: String,
    match_name: Option<String>,
    compare: Option<CompareFn>,
    no_model: bool,
}

impl MonitorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_name: None,
            compare: None,
            no_model: false,
        }
    }

    pub fn match_name(mut self, name: impl Into<String>) -> Self {
        self.match_name = Some(name.into());
        self
    }

    pub fn compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + 'static,
    {
        self.compare = Some(Rc::new(compare));
        self
    }

    /// Exempts the monitor from model binding and comparison.
    pub fn no_model(mut self) -> Self {
        self.no_model = true;
        self
    }

    pub fn build<F, Fut>(self, func: F) -> MonitorDescriptor
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Option<Value>> + 'static,
    {
        MonitorDescriptor {
            name: self.name,
            match_name: self.match_name,
            compare: self.compare,
            no_model: self.no_model,
            func: Rc::new(move || Box::pin(func())),
        }
    }
}

/// A monitor registered on an agent.
///
/// Owns two queues: `results` for consumers and `compare` for the
/// scoreboard task. Both receive every non-null observation in order.
pub struct Monitor {
    agent: String,
    desc: MonitorDescriptor,
    results: Queue<Value>,
    compare: Queue<Value>,
    ports: RefCell<IndexMap<ModelId, (String, Queue<Value>)>>,
}

impl Monitor {
    pub(crate) fn new(agent: &str, desc: MonitorDescriptor, sched: &Scheduler) -> Self {
        Self {
            agent: agent.to_string(),
            desc,
            results: sched.queue(),
            compare: sched.queue(),
            ports: RefCell::new(IndexMap::new()),
        }
    }

    pub fn descriptor(&self) -> &MonitorDescriptor {
        &self.desc
    }

    pub fn path(&self) -> String {
        format!("{}.{}", self.agent, self.desc.match_name())
    }

    /// Number of observations not yet consumed.
    pub fn queue_size(&self) -> usize {
        self.results.len()
    }

    pub(crate) fn results(&self) -> &Queue<Value> {
        &self.results
    }

    pub(crate) fn bind(&self, model: ModelId, model_name: &str, port: Queue<Value>) {
        self.ports
            .borrow_mut()
            .insert(model, (model_name.to_string(), port));
    }

    pub(crate) fn unbind(&self, model: ModelId) {
        self.ports.borrow_mut().shift_remove(&model);
    }

    pub fn bound_models(&self) -> Vec<String> {
        self.ports
            .borrow()
            .values()
            .map(|(model, _)| model.clone())
            .collect()
    }

    /// Spawns the polling task and, unless exempt, the comparison task.
    pub(crate) fn start(self: &Rc<Self>, sched: &Scheduler) {
        let monitor = self.clone();
        let clock = sched.clone();
        sched.spawn(format!("monitor:{}", self.path()), async move {
            loop {
                if let Some(item) = (monitor.desc.func)().await {
                    monitor.results.put(item.clone());
                    if !monitor.desc.no_model {
                        monitor.compare.put(item);
                    }
                }
                clock.step().await;
            }
        });

        if self.desc.no_model {
            return;
        }

        let monitor = self.clone();
        let scoreboard = sched.scoreboard();
        sched.spawn(format!("monitor_compare:{}", self.path()), async move {
            let source = monitor.path();
            loop {
                let dut = monitor.compare.get().await;
                let ports: Vec<Queue<Value>> = monitor
                    .ports
                    .borrow()
                    .values()
                    .map(|(_, port)| port.clone())
                    .collect();
                for port in ports {
                    let model = port.get().await;
                    scoreboard.check(
                        &source,
                        Some(&dut),
                        Some(&model),
                        monitor.desc.compare.as_ref(),
                    );
                }
            }
        });
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("path", &self.path())
            .field("models", &self.bound_models())
            .field("queued", &self.queue_size())
            .finish()
    }
}
