//! Drivers: stimulus operations forwarded to reference models.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::compare::CompareFn;
use crate::error::{BenchError, BenchResult};
use crate::model::ModelId;
use crate::reconcile::DriverBinding;
use crate::scheduler::Scheduler;
use crate::signature::{Param, Signature};
use crate::types::{Args, LocalBoxFuture, Priority, Value, MAX_PRIORITY};

/// DUT-side body of a driver.
pub type DriverFn = Rc<dyn Fn(Args) -> LocalBoxFuture<'static, Option<Value>>>;

/// Order of the DUT call relative to model forwarding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOrder {
    /// Models run in the priority drain, then the DUT call runs.
    ModelFirst,
    /// The DUT call runs, then models run in the next priority drain.
    DutFirst,
    /// Models are queued, the DUT call runs without waiting for them.
    Parallel,
}

impl FromStr for ScheduleOrder {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model_first" => Ok(Self::ModelFirst),
            "dut_first" => Ok(Self::DutFirst),
            "parallel" => Ok(Self::Parallel),
            other => Err(BenchError::InvalidScheduleOrder(other.to_string())),
        }
    }
}

impl fmt::Display for ScheduleOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ModelFirst => "model_first",
            Self::DutFirst => "dut_first",
            Self::Parallel => "parallel",
        };
        f.write_str(s)
    }
}

/// Immutable description of one driver operation.
#[derive(Clone)]
pub struct DriverDescriptor {
    name: String,
    match_name: Option<String>,
    signature: Signature,
    schedule_order: Option<ScheduleOrder>,
    priority: Option<Priority>,
    compare: Option<CompareFn>,
    no_model: bool,
    func: DriverFn,
}

impl DriverDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the operation is matched under in models.
    pub fn match_name(&self) -> &str {
        self.match_name.as_deref().unwrap_or(&self.name)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn schedule_order(&self) -> Option<ScheduleOrder> {
        self.schedule_order
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// True if the operation is exempt from model binding.
    pub fn no_model(&self) -> bool {
        self.no_model
    }
}

impl fmt::Debug for DriverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDescriptor")
            .field("name", &self.name)
            .field("match_name", &self.match_name())
            .field("params", &self.signature.len())
            .field("schedule_order", &self.schedule_order)
            .field("priority", &self.priority)
            .field("no_model", &self.no_model)
            .finish()
    }
}

/// Builder for [`DriverDescriptor`].
///
/// # Example
///
/// ```
/// use cyclebench::agent::{DriverBuilder, ScheduleOrder};
///
/// let add = DriverBuilder::new("add")
///     .params(&["a", "b"])
///     .schedule_order(ScheduleOrder::DutFirst)
///     .build(|args| async move {
///         let sum = args["a"].as_i64()? + args["b"].as_i64()?;
///         Some(sum.into())
///     })
///     .unwrap();
/// assert_eq!(add.match_name(), "add");
/// ```
pub struct DriverBuilder {
    name: String,
    match_name: Option<String>,
    signature: Signature,
    schedule_order: Option<ScheduleOrder>,
    priority: Option<Priority>,
    compare: Option<CompareFn>,
    no_model: bool,
}

impl DriverBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_name: None,
            signature: Signature::default(),
            schedule_order: None,
            priority: None,
            compare: None,
            no_model: false,
        }
    }

    /// Declares required parameters by name.
    pub fn params(mut self, names: &[&str]) -> Self {
        self.signature = Signature::from_names(names);
        self
    }

    /// Appends one parameter, possibly with a default.
    pub fn param(mut self, param: Param) -> Self {
        let mut params = self.signature.params().to_vec();
        params.push(param);
        self.signature = Signature::new(params);
        self
    }

    pub fn schedule_order(mut self, order: ScheduleOrder) -> Self {
        self.schedule_order = Some(order);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + 'static,
    {
        self.compare = Some(Rc::new(compare));
        self
    }

    pub fn match_name(mut self, name: impl Into<String>) -> Self {
        self.match_name = Some(name.into());
        self
    }

    /// Exempts the driver from model binding and comparison.
    pub fn no_model(mut self) -> Self {
        self.no_model = true;
        self
    }

    pub fn build<F, Fut>(self, func: F) -> BenchResult<DriverDescriptor>
    where
        F: Fn(Args) -> Fut + 'static,
        Fut: Future<Output = Option<Value>> + 'static,
    {
        if let Some(priority) = self.priority {
            if priority > MAX_PRIORITY {
                return Err(BenchError::PriorityOutOfRange(priority));
            }
        }
        Ok(DriverDescriptor {
            name: self.name,
            match_name: self.match_name,
            signature: self.signature,
            schedule_order: self.schedule_order,
            priority: self.priority,
            compare: self.compare,
            no_model: self.no_model,
            func: Rc::new(move |args| Box::pin(func(args))),
        })
    }
}

struct ModelBinding {
    model: String,
    binding: DriverBinding,
}

#[derive(Default)]
struct CallResults {
    dut: Option<Value>,
    models: Option<Vec<Option<Value>>>,
}

/// A driver registered on an agent.
pub struct Driver {
    agent: String,
    desc: DriverDescriptor,
    sched: Scheduler,
    bindings: RefCell<IndexMap<ModelId, ModelBinding>>,
}

impl Driver {
    pub(crate) fn new(agent: &str, desc: DriverDescriptor, sched: Scheduler) -> Self {
        Self {
            agent: agent.to_string(),
            desc,
            sched,
            bindings: RefCell::new(IndexMap::new()),
        }
    }

    pub fn descriptor(&self) -> &DriverDescriptor {
        &self.desc
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// `agent.match_name`, used as the comparison source.
    pub fn path(&self) -> String {
        format!("{}.{}", self.agent, self.desc.match_name())
    }

    pub fn bound_models(&self) -> Vec<String> {
        self.bindings
            .borrow()
            .values()
            .map(|b| b.model.clone())
            .collect()
    }

    pub(crate) fn bind(&self, model: ModelId, model_name: &str, binding: DriverBinding) {
        self.bindings.borrow_mut().insert(
            model,
            ModelBinding {
                model: model_name.to_string(),
                binding,
            },
        );
    }

    pub(crate) fn unbind(&self, model: ModelId) {
        self.bindings.borrow_mut().shift_remove(&model);
    }

    pub(crate) fn bind_args(&self, positional: Vec<Value>, named: Args) -> BenchResult<Args> {
        self.desc.signature.bind(&self.path(), positional, named)
    }

    /// Sends the call to every bound model, in attach order.
    async fn forward_to_models(self: Rc<Self>, args: Args) -> Vec<Option<Value>> {
        let targets: Vec<DriverBinding> = self
            .bindings
            .borrow()
            .values()
            .map(|b| b.binding.clone())
            .collect();

        let name = self.desc.match_name().to_string();
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let result = match target {
                DriverBinding::AgentHook(hook) => hook(name.clone(), args.clone()).await,
                DriverBinding::AgentPort(port) => {
                    port.put(json!({ "driver": name, "args": args }));
                    None
                }
                DriverBinding::DriverHook(hook) => hook(args.clone()).await,
                DriverBinding::DriverPort(port) => {
                    port.put(port_payload(&args));
                    None
                }
            };
            results.push(result);
        }
        results
    }

    fn compare_results(&self, dut: Option<&Value>, models: &[Option<Value>]) {
        let scoreboard = self.sched.scoreboard();
        let source = self.path();
        for model in models {
            scoreboard.check(&source, dut, model.as_ref(), self.desc.compare.as_ref());
        }
    }

    /// Runs one invocation under `order`.
    ///
    /// Returns the DUT-side result. Model-side results only feed the
    /// scoreboard.
    pub(crate) async fn process(
        self: Rc<Self>,
        args: Args,
        order: ScheduleOrder,
        priority: Priority,
    ) -> Option<Value> {
        if self.desc.no_model {
            return (self.desc.func)(args).await;
        }

        tracing::debug!(driver = %self.path(), %order, priority, "driver call");
        let results = Rc::new(RefCell::new(CallResults::default()));
        let done = self.sched.event();

        let model_task: LocalBoxFuture<'static, ()> = {
            let driver = self.clone();
            let results = results.clone();
            let args = args.clone();
            Box::pin(async move {
                let models = driver.clone().forward_to_models(args).await;
                let dut = results.borrow().dut.clone();
                if dut.is_some() {
                    driver.compare_results(dut.as_ref(), &models);
                }
                results.borrow_mut().models = Some(models);
            })
        };

        match order {
            ScheduleOrder::Parallel => {
                self.sched.add_priority_task(model_task, priority, done.clone());
                let dut = (self.desc.func)(args).await;
                let models = {
                    let mut results = results.borrow_mut();
                    results.dut = dut.clone();
                    results.models.clone()
                };
                if let Some(models) = models {
                    self.compare_results(dut.as_ref(), &models);
                }
                done.wait().await;
                dut
            }
            ScheduleOrder::ModelFirst => {
                self.sched.add_priority_task(model_task, priority, done.clone());
                done.wait().await;
                let dut = (self.desc.func)(args).await;
                let models = results.borrow().models.clone().unwrap_or_default();
                self.compare_results(dut.as_ref(), &models);
                dut
            }
            ScheduleOrder::DutFirst => {
                let dut = (self.desc.func)(args).await;
                results.borrow_mut().dut = dut.clone();
                self.sched.add_priority_task(model_task, priority, done.clone());
                done.wait().await;
                dut
            }
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("path", &self.path())
            .field("models", &self.bound_models())
            .finish()
    }
}

/// Payload sent to a driver port: the bare value for a single parameter,
/// the whole map otherwise.
pub fn port_payload(args: &Args) -> Value {
    if args.len() == 1 {
        if let Some(value) = args.values().next() {
            return value.clone();
        }
    }
    Value::Object(args.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_order_parse() {
        assert_eq!("model_first".parse::<ScheduleOrder>().unwrap(), ScheduleOrder::ModelFirst);
        assert_eq!("dut_first".parse::<ScheduleOrder>().unwrap(), ScheduleOrder::DutFirst);
        assert_eq!("parallel".parse::<ScheduleOrder>().unwrap(), ScheduleOrder::Parallel);
        assert!(matches!(
            "sometime".parse::<ScheduleOrder>(),
            Err(BenchError::InvalidScheduleOrder(_))
        ));
        assert_eq!(ScheduleOrder::DutFirst.to_string(), "dut_first");
    }

    #[test]
    fn test_builder_priority_range() {
        let result = DriverBuilder::new("op").priority(100).build(|_| async { None });
        assert!(matches!(result, Err(BenchError::PriorityOutOfRange(100))));
    }

    #[test]
    fn test_match_name() {
        let desc = DriverBuilder::new("send_req")
            .match_name("request")
            .no_model()
            .build(|_| async { None })
            .unwrap();
        assert_eq!(desc.name(), "send_req");
        assert_eq!(desc.match_name(), "request");
        assert!(desc.no_model());
    }

    #[test]
    fn test_port_payload() {
        let mut one = Args::new();
        one.insert("a".into(), json!(3));
        assert_eq!(port_payload(&one), json!(3));

        let mut two = one.clone();
        two.insert("b".into(), json!(4));
        assert_eq!(port_payload(&two), json!({"a": 3, "b": 4}));

        assert_eq!(port_payload(&Args::new()), json!({}));
    }
}
