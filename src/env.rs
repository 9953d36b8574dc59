//! Test environment: the composition root holding agents and attached
//! reference models.
//!
//! Attaching a model runs the reconciler against every agent, requires
//! every model endpoint to be matched, and only then injects the bindings.
//! A failed attach leaves no bindings behind and clears the model's marks.
//! A model belongs to at most one env at a time.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::agent::Agent;
use crate::compare::Scoreboard;
use crate::config::BindingConfig;
use crate::error::{BenchError, BenchResult};
use crate::model::Model;
use crate::reconcile::{reconcile, Wiring};
use crate::scheduler::Scheduler;

/// Unique env identifier.
pub type EnvId = u64;

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(1);

/// Builder for [`Env`].
pub struct EnvBuilder {
    sched: Scheduler,
    binding: BindingConfig,
    agents: Vec<Agent>,
}

impl EnvBuilder {
    pub fn new(sched: &Scheduler) -> Self {
        Self {
            sched: sched.clone(),
            binding: sched.config().binding,
            agents: Vec::new(),
        }
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Overrides the binding rules taken from the scheduler's config.
    pub fn binding(mut self, binding: BindingConfig) -> Self {
        self.binding = binding;
        self
    }

    pub fn build(self) -> BenchResult<Env> {
        let mut agents = IndexMap::new();
        for agent in self.agents {
            let name = agent.name().to_string();
            if agents.contains_key(&name) {
                return Err(BenchError::Duplicate { kind: "agent", name });
            }
            agents.insert(name, agent);
        }
        Ok(Env {
            id: NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed),
            sched: self.sched,
            binding: self.binding,
            agents,
            models: RefCell::new(Vec::new()),
        })
    }
}

/// Agents plus the models attached to them.
pub struct Env {
    id: EnvId,
    sched: Scheduler,
    binding: BindingConfig,
    agents: IndexMap<String, Agent>,
    models: RefCell<Vec<Model>>,
}

impl Env {
    pub fn builder(sched: &Scheduler) -> EnvBuilder {
        EnvBuilder::new(sched)
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn binding(&self) -> &BindingConfig {
        &self.binding
    }

    pub fn agent(&self, name: &str) -> BenchResult<&Agent> {
        self.agents
            .get(name)
            .ok_or_else(|| BenchError::UnknownAgent(name.to_string()))
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Attached models, in attach order.
    pub fn models(&self) -> Vec<Model> {
        self.models.borrow().clone()
    }

    pub fn has_model(&self, model: &Model) -> bool {
        self.models.borrow().iter().any(|m| m == model)
    }

    pub fn scoreboard(&self) -> Scoreboard {
        self.sched.scoreboard()
    }

    /// Binds `model` to every agent operation.
    ///
    /// Fails without side effects if an operation cannot be resolved, an
    /// endpoint of the model stays unmatched, or the model is still
    /// attached to another env.
    pub fn attach(&self, model: &Model) -> BenchResult<Wiring> {
        match model.attached_to() {
            Some(id) if id != self.id => {
                return Err(BenchError::ModelAttachedElsewhere(model.name().to_string()));
            }
            Some(_) => {
                tracing::warn!(model = %model.name(), "model already attached, re-validating");
                self.release(model);
                model.set_attached_to(None);
            }
            None => {}
        }
        model.clear_matched();

        let wiring = match self.validate(model) {
            Ok(wiring) => wiring,
            Err(e) => {
                model.clear_matched();
                return Err(e);
            }
        };

        wiring.inject(model);
        self.models.borrow_mut().push(model.clone());
        model.set_attached_to(Some(self.id));
        tracing::info!(
            model = %model.name(),
            drivers = wiring.driver_count(),
            monitors = wiring.monitor_count(),
            "model attached"
        );
        Ok(wiring)
    }

    fn validate(&self, model: &Model) -> BenchResult<Wiring> {
        let wiring = reconcile(model, self.agents.values(), &self.binding)?;
        model.ensure_all_matched()?;
        Ok(wiring)
    }

    /// Removes every binding of `model` and clears its matched marks.
    pub fn unattach(&self, model: &Model) -> BenchResult<()> {
        if !self.has_model(model) {
            return Err(BenchError::ModelNotAttached(model.name().to_string()));
        }
        self.release(model);
        model.clear_matched();
        model.set_attached_to(None);
        tracing::info!(model = %model.name(), "model detached");
        Ok(())
    }

    fn release(&self, model: &Model) {
        self.models.borrow_mut().retain(|m| m != model);
        for agent in self.agents.values() {
            for driver in agent.drivers() {
                driver.unbind(model.id());
            }
            for monitor in agent.monitors() {
                monitor.unbind(model.id());
            }
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models: Vec<String> = self
            .models
            .borrow()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        f.debug_struct("Env")
            .field("id", &self.id)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("models", &models)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DriverBuilder, MonitorBuilder};
    use crate::config::BenchConfig;
    use crate::runtime::Runtime;

    fn setup() -> (Scheduler, Env) {
        let sched = Scheduler::new(Runtime::new().spawner(), BenchConfig::default());
        let agent = Agent::builder("adder")
            .driver(
                DriverBuilder::new("add")
                    .params(&["a", "b"])
                    .build(|_| async { None })
                    .unwrap(),
            )
            .monitor(MonitorBuilder::new("sum").build(|| async { None }))
            .build(&sched)
            .unwrap();
        let env = Env::builder(&sched).agent(agent).build().unwrap();
        (sched, env)
    }

    fn full_model(sched: &Scheduler) -> Model {
        Model::builder(sched, "ref")
            .driver_hook("adder.add", |_| None)
            .monitor_port("adder.sum")
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_agent() {
        let sched = Scheduler::new(Runtime::new().spawner(), BenchConfig::default());
        let a = Agent::builder("x").build(&sched).unwrap();
        let b = Agent::builder("x").build(&sched).unwrap();
        let result = Env::builder(&sched).agent(a).agent(b).build();
        assert!(matches!(result, Err(BenchError::Duplicate { kind: "agent", .. })));
    }

    #[test]
    fn test_unknown_agent() {
        let (_sched, env) = setup();
        assert!(env.agent("adder").is_ok());
        assert!(matches!(env.agent("nope"), Err(BenchError::UnknownAgent(_))));
    }

    #[test]
    fn test_attach_detach_reattach() {
        let (sched, env) = setup();
        let model = full_model(&sched);

        env.attach(&model).unwrap();
        assert!(model.is_attached());
        let driver = env.agent("adder").unwrap().driver("add").unwrap().clone();
        assert_eq!(driver.bound_models(), vec!["ref"]);

        env.unattach(&model).unwrap();
        assert!(!model.is_attached());
        assert!(driver.bound_models().is_empty());
        assert_eq!(model.unmatched().len(), 2);

        env.attach(&model).unwrap();
        assert_eq!(driver.bound_models(), vec!["ref"]);
        assert_eq!(env.models().len(), 1);
    }

    #[test]
    fn test_attach_twice_rebinds_once() {
        let (sched, env) = setup();
        let model = full_model(&sched);
        env.attach(&model).unwrap();
        env.attach(&model).unwrap();
        assert_eq!(env.models().len(), 1);
        let driver = env.agent("adder").unwrap().driver("add").unwrap().clone();
        assert_eq!(driver.bound_models().len(), 1);
    }

    #[test]
    fn test_failed_attach_leaves_nothing() {
        let (sched, env) = setup();
        let model = Model::builder(&sched, "partial")
            .driver_hook("adder.add", |_| None)
            .monitor_port("adder.sum")
            .driver_port("other.op")
            .build()
            .unwrap();

        let err = env.attach(&model).unwrap_err();
        assert!(matches!(err, BenchError::UnmatchedEndpoint { .. }));
        assert!(!model.is_attached());
        assert!(env.models().is_empty());
        assert_eq!(model.unmatched().len(), 3);
        let driver = env.agent("adder").unwrap().driver("add").unwrap().clone();
        assert!(driver.bound_models().is_empty());
    }

    #[test]
    fn test_attach_to_second_env_refused() {
        let (sched, first) = setup();
        let second_agent = Agent::builder("adder")
            .driver(DriverBuilder::new("add").build(|_| async { None }).unwrap())
            .monitor(MonitorBuilder::new("sum").build(|| async { None }))
            .build(&sched)
            .unwrap();
        let second = Env::builder(&sched).agent(second_agent).build().unwrap();
        let model = full_model(&sched);

        first.attach(&model).unwrap();
        let err = second.attach(&model).unwrap_err();
        assert!(matches!(err, BenchError::ModelAttachedElsewhere(_)));
        assert!(!second.has_model(&model));
        assert_eq!(model.attached_to(), Some(first.id()));
        assert!(model.unmatched().is_empty());

        // The other env cannot detach it either
        assert!(matches!(second.unattach(&model), Err(BenchError::ModelNotAttached(_))));
        assert!(model.is_attached());

        first.unattach(&model).unwrap();
        second.attach(&model).unwrap();
        assert_eq!(model.attached_to(), Some(second.id()));
        let driver = first.agent("adder").unwrap().driver("add").unwrap().clone();
        assert!(driver.bound_models().is_empty());
    }

    #[test]
    fn test_unattach_unknown() {
        let (sched, env) = setup();
        let model = full_model(&sched);
        assert!(matches!(
            env.unattach(&model),
            Err(BenchError::ModelNotAttached(_))
        ));
    }
}
