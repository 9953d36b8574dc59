//! Error taxonomy for the testbench runtime.
//!
//! Configuration and wiring errors are returned immediately from the call
//! that detects them, during environment construction. Comparison
//! mismatches are never errors; they are recorded by the scoreboard.

use thiserror::Error;

use crate::types::{ClockTick, Priority};

/// Errors raised by the runtime, the executor and the reconciler.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Invalid schedule order: {0} (expected model_first, dut_first or parallel)")]
    InvalidScheduleOrder(String),

    #[error("Invalid exit policy: {0} (expected all, none or any)")]
    InvalidExitPolicy(String),

    #[error("Priority {0} out of range, should be between 0 and 99")]
    PriorityOutOfRange(Priority),

    #[error("{name} is not a driver call, cannot set {option}")]
    NotADriver { name: String, option: &'static str },

    #[error("Malformed endpoint path: {0:?}")]
    MalformedPath(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent {agent} has no {kind} named {name}")]
    UnknownOperation {
        agent: String,
        kind: &'static str,
        name: String,
    },

    #[error("Duplicate {kind} named {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("Model {model}: {path} is bound to both a hook and a port")]
    DualBinding { model: String, path: String },

    #[error("Model {model}: {path} is bound at both the agent level and the operation level")]
    LevelConflict { model: String, path: String },

    #[error("Model {model}: {endpoint} is not matched")]
    UnmatchedEndpoint { model: String, endpoint: String },

    #[error("Model {model} has no endpoint for {path}")]
    UnresolvedOperation { model: String, path: String },

    #[error("Model {model} has no {endpoint}")]
    UnknownEndpoint { model: String, endpoint: String },

    #[error("Model {0} is not attached to the env")]
    ModelNotAttached(String),

    #[error("Model {0} is attached to another env, unattach it there first")]
    ModelAttachedElsewhere(String),

    #[error("{operation}: missing argument {name}")]
    MissingArgument { operation: String, name: String },

    #[error("{operation}: takes {expected} positional arguments but {given} were given")]
    TooManyArguments {
        operation: String,
        expected: usize,
        given: usize,
    },

    #[error("{operation}: unexpected argument {name}")]
    UnexpectedArgument { operation: String, name: String },

    #[error("{operation}: argument {name} given twice")]
    DuplicateArgument { operation: String, name: String },

    #[error("Clock already started")]
    ClockAlreadyStarted,

    #[error("Runtime stalled: every task is blocked and no clock is running")]
    Stalled,

    #[error("Cycle limit exceeded at tick {tick} (max_cycles = {limit})")]
    CycleLimitExceeded { tick: ClockTick, limit: u64 },

    #[error("Task {0} was dropped before completing")]
    TaskDropped(String),
}

/// Result type for runtime operations.
pub type BenchResult<T> = Result<T, BenchError>;
