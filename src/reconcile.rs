//! Model reconciliation: binding agent operations to model endpoints.
//!
//! For every driver the reconciler looks at four candidate endpoints: a
//! driver hook or driver port at the operation's `agent.match_name` path,
//! and an agent hook or agent port for the whole agent. Monitors only bind
//! to monitor ports. Operations built with `no_model()` are skipped.
//!
//! What happens when more than one candidate exists is governed by
//! [`BindingConfig`]:
//!
//! - `on_conflict: reject` (default): hook plus port at one level is a
//!   [`BenchError::DualBinding`]; an agent-level plus an operation-level
//!   endpoint is a [`BenchError::LevelConflict`].
//! - `on_conflict: precedence`: the level is picked by `precedence`, the
//!   kind within a level by `prefer`. Endpoints losing on kind, and
//!   operation-level endpoints losing on level, are marked matched.
//!   Agent-level endpoints are only marked when they serve at least one
//!   operation.
//!
//! An operation with no candidate is a [`BenchError::UnresolvedOperation`].
//! Reconciliation marks endpoints but binds nothing; the returned
//! [`Wiring`] is injected by the env once the model passes its
//! completeness check.

use std::fmt;
use std::rc::Rc;

use crate::agent::{Agent, Driver, Monitor};
use crate::config::{BindingConfig, ConflictPolicy, EndpointKind, Precedence};
use crate::error::{BenchError, BenchResult};
use crate::model::{AgentHookFn, DriverHookFn, EndpointPath, Model};
use crate::sync::Queue;
use crate::types::Value;

/// How one driver forwards its calls to one model.
#[derive(Clone)]
pub enum DriverBinding {
    AgentHook(AgentHookFn),
    AgentPort(Queue<Value>),
    DriverHook(DriverHookFn),
    DriverPort(Queue<Value>),
}

impl DriverBinding {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AgentHook(_) => "agent hook",
            Self::AgentPort(_) => "agent port",
            Self::DriverHook(_) => "driver hook",
            Self::DriverPort(_) => "driver port",
        }
    }
}

impl fmt::Debug for DriverBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Bindings computed for one model, not yet injected.
pub struct Wiring {
    pub(crate) drivers: Vec<(Rc<Driver>, DriverBinding)>,
    pub(crate) monitors: Vec<(Rc<Monitor>, Queue<Value>)>,
}

impl Wiring {
    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// `(path, endpoint kind)` for every driver binding.
    pub fn describe(&self) -> Vec<(String, &'static str)> {
        self.drivers
            .iter()
            .map(|(driver, binding)| (driver.path(), binding.describe()))
            .collect()
    }

    pub(crate) fn inject(&self, model: &Model) {
        for (driver, binding) in &self.drivers {
            driver.bind(model.id(), model.name(), binding.clone());
        }
        for (monitor, port) in &self.monitors {
            monitor.bind(model.id(), model.name(), port.clone());
        }
    }
}

impl fmt::Debug for Wiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wiring")
            .field("drivers", &self.describe())
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

/// Candidate endpoints of one driver at one level.
struct Level {
    hook: Option<DriverBinding>,
    port: Option<DriverBinding>,
}

impl Level {
    fn is_empty(&self) -> bool {
        self.hook.is_none() && self.port.is_none()
    }

    fn is_dual(&self) -> bool {
        self.hook.is_some() && self.port.is_some()
    }

    fn pick(self, prefer: EndpointKind) -> Option<DriverBinding> {
        match prefer {
            EndpointKind::Hook => self.hook.or(self.port),
            EndpointKind::Port => self.port.or(self.hook),
        }
    }
}

/// Computes the bindings of `model` against `agents`, marking every
/// endpoint that serves an operation.
pub fn reconcile<'a>(
    model: &Model,
    agents: impl IntoIterator<Item = &'a Agent>,
    config: &BindingConfig,
) -> BenchResult<Wiring> {
    let mut wiring = Wiring {
        drivers: Vec::new(),
        monitors: Vec::new(),
    };

    for agent in agents {
        for driver in agent.drivers() {
            if driver.descriptor().no_model() {
                continue;
            }
            let binding = resolve_driver(model, agent.name(), driver, config)?;
            wiring.drivers.push((driver.clone(), binding));
        }

        for monitor in agent.monitors() {
            let desc = monitor.descriptor();
            if desc.no_model() {
                continue;
            }
            let path = EndpointPath::new(agent.name(), desc.match_name())?;
            let endpoint = model.monitor_port_endpoint(&path).ok_or_else(|| {
                BenchError::UnresolvedOperation {
                    model: model.name().to_string(),
                    path: path.to_string(),
                }
            })?;
            endpoint.mark_matched();
            wiring.monitors.push((monitor.clone(), endpoint.target.clone()));
        }
    }

    tracing::debug!(
        model = %model.name(),
        drivers = wiring.drivers.len(),
        monitors = wiring.monitors.len(),
        "model reconciled"
    );
    Ok(wiring)
}

fn resolve_driver(
    model: &Model,
    agent: &str,
    driver: &Driver,
    config: &BindingConfig,
) -> BenchResult<DriverBinding> {
    let path = EndpointPath::new(agent, driver.descriptor().match_name())?;

    let op_hook = model.driver_hook_endpoint(&path);
    let op_port = model.driver_port_endpoint(&path);
    let agent_hook = model.agent_hook_endpoint(agent);
    let agent_port = model.agent_port_endpoint(agent);

    let operation = Level {
        hook: op_hook.map(|e| DriverBinding::DriverHook(e.target.clone())),
        port: op_port.map(|e| DriverBinding::DriverPort(e.target.clone())),
    };
    let agent_level = Level {
        hook: agent_hook.map(|e| DriverBinding::AgentHook(e.target.clone())),
        port: agent_port.map(|e| DriverBinding::AgentPort(e.target.clone())),
    };

    if operation.is_empty() && agent_level.is_empty() {
        return Err(BenchError::UnresolvedOperation {
            model: model.name().to_string(),
            path: path.to_string(),
        });
    }

    if config.on_conflict == ConflictPolicy::Reject {
        if operation.is_dual() {
            return Err(BenchError::DualBinding {
                model: model.name().to_string(),
                path: path.to_string(),
            });
        }
        if !operation.is_empty() && !agent_level.is_empty() {
            return Err(BenchError::LevelConflict {
                model: model.name().to_string(),
                path: path.to_string(),
            });
        }
        if agent_level.is_dual() {
            return Err(BenchError::DualBinding {
                model: model.name().to_string(),
                path: agent.to_string(),
            });
        }
    }

    let use_operation = match config.precedence {
        Precedence::SpecificFirst => !operation.is_empty(),
        Precedence::AgentFirst => agent_level.is_empty(),
    };

    // Operation-level endpoints always count once the operation exists.
    op_hook.iter().for_each(|e| e.mark_matched());
    op_port.iter().for_each(|e| e.mark_matched());
    if !use_operation {
        agent_hook.iter().for_each(|e| e.mark_matched());
        agent_port.iter().for_each(|e| e.mark_matched());
    }

    let chosen = if use_operation {
        operation.pick(config.prefer)
    } else {
        agent_level.pick(config.prefer)
    };
    chosen.ok_or_else(|| BenchError::UnresolvedOperation {
        model: model.name().to_string(),
        path: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DriverBuilder, MonitorBuilder};
    use crate::config::BenchConfig;
    use crate::runtime::Runtime;
    use crate::scheduler::Scheduler;

    fn sched() -> Scheduler {
        Scheduler::new(Runtime::new().spawner(), BenchConfig::default())
    }

    fn agent(sched: &Scheduler) -> Agent {
        Agent::builder("adder")
            .driver(
                DriverBuilder::new("add")
                    .params(&["a", "b"])
                    .build(|_| async { None })
                    .unwrap(),
            )
            .driver(
                DriverBuilder::new("reset")
                    .no_model()
                    .build(|_| async { None })
                    .unwrap(),
            )
            .monitor(MonitorBuilder::new("sum").build(|| async { None }))
            .build(sched)
            .unwrap()
    }

    fn precedence() -> BindingConfig {
        BindingConfig {
            on_conflict: ConflictPolicy::Precedence,
            ..BindingConfig::default()
        }
    }

    #[test]
    fn test_operation_level_binding() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let wiring = reconcile(&model, [&agent], &BindingConfig::default()).unwrap();
        assert_eq!(wiring.describe(), vec![("adder.add".to_string(), "driver hook")]);
        assert_eq!(wiring.monitor_count(), 1);
        assert!(model.ensure_all_matched().is_ok());
    }

    #[test]
    fn test_agent_level_binding() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .agent_port("adder")
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let wiring = reconcile(&model, [&agent], &BindingConfig::default()).unwrap();
        assert_eq!(wiring.describe(), vec![("adder.add".to_string(), "agent port")]);
        assert!(model.ensure_all_matched().is_ok());
    }

    #[test]
    fn test_dual_binding_rejected() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .driver_port("adder.add")
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let err = reconcile(&model, [&agent], &BindingConfig::default()).unwrap_err();
        assert!(matches!(err, BenchError::DualBinding { ref path, .. } if path == "adder.add"));
    }

    #[test]
    fn test_level_conflict_rejected() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .agent_hook("adder", |_, _| None)
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let err = reconcile(&model, [&agent], &BindingConfig::default()).unwrap_err();
        assert!(matches!(err, BenchError::LevelConflict { .. }));
    }

    #[test]
    fn test_unresolved_operation() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .build()
            .unwrap();

        let err = reconcile(&model, [&agent], &BindingConfig::default()).unwrap_err();
        assert!(matches!(err, BenchError::UnresolvedOperation { ref path, .. } if path == "adder.sum"));
    }

    #[test]
    fn test_precedence_prefers_kind() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .driver_port("adder.add")
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let config = BindingConfig {
            prefer: EndpointKind::Port,
            ..precedence()
        };
        let wiring = reconcile(&model, [&agent], &config).unwrap();
        assert_eq!(wiring.describe()[0].1, "driver port");
        assert!(model.ensure_all_matched().is_ok());
    }

    #[test]
    fn test_precedence_agent_first() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .agent_hook("adder", |_, _| None)
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let config = BindingConfig {
            precedence: Precedence::AgentFirst,
            ..precedence()
        };
        let wiring = reconcile(&model, [&agent], &config).unwrap();
        assert_eq!(wiring.describe()[0].1, "agent hook");
        assert!(model.ensure_all_matched().is_ok());
    }

    #[test]
    fn test_shadowed_agent_endpoint_unmatched() {
        let sched = sched();
        let agent = agent(&sched);
        let model = Model::builder(&sched, "ref")
            .driver_hook("adder.add", |_| None)
            .agent_hook("adder", |_, _| None)
            .monitor_port("adder.sum")
            .build()
            .unwrap();

        let wiring = reconcile(&model, [&agent], &precedence()).unwrap();
        assert_eq!(wiring.describe()[0].1, "driver hook");
        assert_eq!(model.unmatched(), vec!["agent hook adder".to_string()]);
    }
}
