//! Configuration system for the testbench runtime.
//!
//! This module provides YAML/JSON configuration file support for the
//! scheduler, the executor defaults and the model binding rules.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   name: adder_regression
//!   max_cycles: 100000
//!   log_level: info
//!   match_detail: false
//!   report_dir: target/bench-reports
//!
//! executor:
//!   exit_policy: all
//!   default_priority: 99
//!   default_schedule_order: model_first
//!
//! binding:
//!   precedence: specific_first
//!   on_conflict: reject
//!   prefer: hook
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::ScheduleOrder;
use crate::error::{BenchError, BenchResult};
use crate::executor::ExitPolicy;
use crate::types::{Priority, DEFAULT_PRIORITY, MAX_PRIORITY};

/// Global simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Name used in the run summary
    #[serde(default)]
    pub name: String,

    /// Stop the clock with an error once this many cycles have been stepped
    #[serde(default)]
    pub max_cycles: Option<u64>,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log both operands on every match, not only on mismatches
    #[serde(default)]
    pub match_detail: bool,

    /// Directory regression sessions write their JSON/CSV reports into
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_cycles: None,
            log_level: default_log_level(),
            match_detail: false,
            report_dir: None,
        }
    }
}

/// Defaults applied by the priority executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorParams {
    /// Completion policy for executors built from this config
    #[serde(default)]
    pub exit_policy: ExitPolicy,

    /// Priority given to driver calls that do not declare one
    #[serde(default = "default_priority")]
    pub default_priority: Priority,

    /// Schedule order given to driver calls that do not declare one
    #[serde(default = "default_schedule_order")]
    pub default_schedule_order: ScheduleOrder,
}

fn default_priority() -> Priority {
    DEFAULT_PRIORITY
}

fn default_schedule_order() -> ScheduleOrder {
    ScheduleOrder::ModelFirst
}

impl Default for ExecutorParams {
    fn default() -> Self {
        Self {
            exit_policy: ExitPolicy::default(),
            default_priority: default_priority(),
            default_schedule_order: default_schedule_order(),
        }
    }
}

/// Which binding level wins when both could serve an operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    /// `agent.operation` endpoints before agent-wide endpoints
    #[default]
    SpecificFirst,
    /// Agent-wide endpoints before `agent.operation` endpoints
    AgentFirst,
}

/// What to do when more than one endpoint could serve an operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the attach
    #[default]
    Reject,
    /// Pick the winner by `precedence` and `prefer`
    Precedence,
}

/// The two endpoint styles a model can offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// A callable invoked with the call's arguments
    #[default]
    Hook,
    /// A FIFO channel the arguments are pushed onto
    Port,
}

/// Model reconciliation rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(default)]
    pub precedence: Precedence,

    #[serde(default)]
    pub on_conflict: ConflictPolicy,

    /// Endpoint kind that wins a same-level hook/port conflict
    #[serde(default)]
    pub prefer: EndpointKind,
}

/// Complete testbench configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub simulation: SimulationParams,

    #[serde(default)]
    pub executor: ExecutorParams,

    #[serde(default)]
    pub binding: BindingConfig,
}

impl BenchConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a [`BenchConfigBuilder`].
    pub fn builder() -> BenchConfigBuilder {
        BenchConfigBuilder::new()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> BenchResult<Self> {
        let config: BenchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> BenchResult<Self> {
        let config: BenchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(BenchError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> BenchResult<()> {
        if self.executor.default_priority > MAX_PRIORITY {
            return Err(BenchError::PriorityOutOfRange(self.executor.default_priority));
        }

        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.simulation.log_level) {
            return Err(BenchError::Validation(format!(
                "invalid log_level {:?}: {e}",
                self.simulation.log_level
            )));
        }

        if self.simulation.max_cycles == Some(0) {
            return Err(BenchError::Validation(
                "max_cycles must be greater than zero when set".to_string(),
            ));
        }

        if self.binding.on_conflict == ConflictPolicy::Reject
            && self.binding.prefer == EndpointKind::Port
        {
            tracing::warn!("binding.prefer has no effect when on_conflict is reject");
        }

        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> BenchResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> BenchResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for creating a `BenchConfig` programmatically.
#[derive(Default)]
pub struct BenchConfigBuilder {
    config: BenchConfig,
}

impl BenchConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.simulation.name = name.into();
        self
    }

    /// Sets the cycle watchdog.
    pub fn max_cycles(mut self, cycles: u64) -> Self {
        self.config.simulation.max_cycles = Some(cycles);
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Logs both operands on matches too.
    pub fn match_detail(mut self, enable: bool) -> Self {
        self.config.simulation.match_detail = enable;
        self
    }

    /// Sets the directory session reports are written to.
    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.simulation.report_dir = Some(dir.into());
        self
    }

    /// Sets the default executor exit policy.
    pub fn exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.config.executor.exit_policy = policy;
        self
    }

    /// Sets the default driver priority.
    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.config.executor.default_priority = priority;
        self
    }

    /// Sets the default driver schedule order.
    pub fn default_schedule_order(mut self, order: ScheduleOrder) -> Self {
        self.config.executor.default_schedule_order = order;
        self
    }

    /// Sets the model binding rules.
    pub fn binding(mut self, binding: BindingConfig) -> Self {
        self.config.binding = binding;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> BenchResult<BenchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
