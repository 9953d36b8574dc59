//! Core type definitions for the testbench runtime.
//!
//! This module defines the fundamental types shared by the scheduler,
//! executor, agents and models.

use std::future::Future;
use std::pin::Pin;

/// Simulated clock tick (number of DUT cycles stepped so far).
///
/// Owned by the scheduler and advanced exactly once per settled cycle.
pub type ClockTick = u64;

/// Unique identifier of a task spawned on the runtime.
pub type TaskId = u64;

/// Priority of a model-side continuation. Lower runs earlier.
pub type Priority = u8;

/// Priority used when a driver call does not declare one.
pub const DEFAULT_PRIORITY: Priority = 99;

/// Highest (least urgent) priority a driver may declare.
pub const MAX_PRIORITY: Priority = 99;

/// Dynamic value exchanged between stimulus code, the DUT wrapper and
/// reference models.
pub type Value = serde_json::Value;

/// Arguments of one operation call, bound by parameter name.
pub type Args = serde_json::Map<String, Value>;

/// A boxed, non-`Send` future. All tasks live on one thread.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let tick: ClockTick = 1000;
        let task: TaskId = 42;
        let prio: Priority = DEFAULT_PRIORITY;
        let mut args = Args::new();
        args.insert("a".to_string(), Value::from(3));

        assert_eq!(tick, 1000);
        assert_eq!(task, 42);
        assert_eq!(prio, MAX_PRIORITY);
        assert_eq!(args["a"], 3);
    }
}
