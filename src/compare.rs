//! Streaming comparison between DUT-side and model-side values.
//!
//! Mismatches never stop the run. They are logged with both operands and
//! recorded on the [`Scoreboard`], whose counters end up in the run summary.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::runtime::JoinHandle;
use crate::scheduler::Scheduler;
use crate::stats::CompareStats;
use crate::sync::Queue;
use crate::types::{ClockTick, Value};

/// Equality predicate applied to a `(dut, model)` pair.
pub type CompareFn = Rc<dyn Fn(&Value, &Value) -> bool>;

/// Structural equality.
pub fn default_compare(dut: &Value, model: &Value) -> bool {
    dut == model
}

/// One recorded mismatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub source: String,
    pub tick: ClockTick,
    pub dut: Value,
    pub model: Value,
}

#[derive(Default)]
struct ScoreboardState {
    stats: CompareStats,
    mismatches: Vec<Mismatch>,
}

/// Records comparison outcomes for one testbench.
#[derive(Clone)]
pub struct Scoreboard {
    state: Rc<RefCell<ScoreboardState>>,
    clock: Rc<Cell<ClockTick>>,
    match_detail: bool,
}

impl Scoreboard {
    /// Creates a scoreboard with its own (never advancing) tick.
    pub fn new(match_detail: bool) -> Self {
        Self::with_clock(match_detail, Rc::new(Cell::new(0)))
    }

    /// Creates a scoreboard that stamps records with the shared tick.
    pub fn with_clock(match_detail: bool, clock: Rc<Cell<ClockTick>>) -> Self {
        Self {
            state: Rc::new(RefCell::new(ScoreboardState::default())),
            clock,
            match_detail,
        }
    }

    /// Compares two present values and records the outcome.
    ///
    /// Returns true on match.
    pub fn compare(
        &self,
        source: &str,
        dut: &Value,
        model: &Value,
        compare: Option<&CompareFn>,
    ) -> bool {
        let matched = match compare {
            Some(f) => f(dut, model),
            None => default_compare(dut, model),
        };
        let tick = self.clock.get();

        let mut state = self.state.borrow_mut();
        if matched {
            state.stats.record_match(source);
            if self.match_detail {
                tracing::info!(source, tick, %dut, %model, "match");
            } else {
                tracing::info!(source, tick, "match");
            }
        } else {
            state.stats.record_mismatch(source);
            state.mismatches.push(Mismatch {
                source: source.to_string(),
                tick,
                dut: dut.clone(),
                model: model.clone(),
            });
            tracing::error!(source, tick, %dut, %model, "mismatch");
        }
        matched
    }

    /// Compares a possibly-absent pair. Nothing is compared unless both
    /// sides produced a value; `null` counts as no value.
    ///
    /// Returns `None` when the comparison was skipped.
    pub fn check(
        &self,
        source: &str,
        dut: Option<&Value>,
        model: Option<&Value>,
        compare: Option<&CompareFn>,
    ) -> Option<bool> {
        let dut = dut.filter(|v| !v.is_null());
        let model = model.filter(|v| !v.is_null());
        match (dut, model) {
            (Some(dut), Some(model)) => Some(self.compare(source, dut, model, compare)),
            (None, None) => {
                self.state.borrow_mut().stats.record_skip(source);
                None
            }
            (Some(dut), None) => {
                tracing::warn!(source, %dut, "dut produced a value but the model did not");
                self.state.borrow_mut().stats.record_skip(source);
                None
            }
            (None, Some(model)) => {
                tracing::warn!(source, %model, "model produced a value but the dut did not");
                self.state.borrow_mut().stats.record_skip(source);
                None
            }
        }
    }

    pub fn matched(&self) -> u64 {
        self.state.borrow().stats.matched
    }

    pub fn mismatched(&self) -> u64 {
        self.state.borrow().stats.mismatched
    }

    pub fn skipped(&self) -> u64 {
        self.state.borrow().stats.skipped
    }

    /// Returns true if nothing mismatched so far.
    pub fn passed(&self) -> bool {
        self.mismatched() == 0
    }

    pub fn mismatches(&self) -> Vec<Mismatch> {
        self.state.borrow().mismatches.clone()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CompareStats {
        self.state.borrow().stats.clone()
    }
}

impl std::fmt::Debug for Scoreboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Scoreboard")
            .field("matched", &state.stats.matched)
            .field("mismatched", &state.stats.mismatched)
            .field("skipped", &state.stats.skipped)
            .finish()
    }
}

/// Standing comparison task.
///
/// Pulls one value from the DUT-side queue, then one value from every
/// model-side queue in order, and compares each pair through
/// [`Scoreboard::check`].
pub struct Comparator {
    name: String,
    dut: Queue<Value>,
    models: Vec<Queue<Value>>,
    compare: Option<CompareFn>,
}

impl Comparator {
    pub fn new(name: impl Into<String>, dut: Queue<Value>, models: Vec<Queue<Value>>) -> Self {
        Self {
            name: name.into(),
            dut,
            models,
            compare: None,
        }
    }

    /// Replaces the default structural equality.
    pub fn with_compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + 'static,
    {
        self.compare = Some(Rc::new(compare));
        self
    }

    /// Spawns the comparison loop. It runs until the runtime is dropped.
    pub fn start(self, sched: &Scheduler) -> JoinHandle<()> {
        let scoreboard = sched.scoreboard();
        let task_name = format!("comparator:{}", self.name);
        sched.spawn(task_name, async move {
            loop {
                let dut = self.dut.get().await;
                for port in &self.models {
                    let model = port.get().await;
                    scoreboard.check(&self.name, Some(&dut), Some(&model), self.compare.as_ref());
                }
            }
        })
    }
}
