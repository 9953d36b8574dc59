//! Statistics collection and export for testbench runs.
//!
//! This module tracks scheduler and scoreboard counters. A run's stats
//! can be rendered as a plain-text summary or written to a report
//! directory as JSON plus a per-source CSV.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::BenchResult;
use crate::types::ClockTick;

/// Aggregate statistics for a testbench run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BenchStats {
    /// Run metadata
    pub metadata: RunMetadata,

    /// Scheduler-level statistics
    pub scheduler: SchedulerStats,

    /// Scoreboard statistics
    pub compare: CompareStats,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run name
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version
    pub version: String,
}

/// Scheduler counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Cycles stepped (final clock tick)
    pub cycles: ClockTick,

    /// Settle passes across all cycles
    pub settle_passes: u64,

    /// Priority entries executed
    pub priority_drained: u64,

    /// Before-step callbacks invoked
    pub callbacks_run: u64,

    /// Tasks spawned on the runtime
    pub tasks_spawned: u64,

    /// Task polls performed by the runtime
    pub polls: u64,
}

/// Per-source comparison counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub matched: u64,
    pub mismatched: u64,
    pub skipped: u64,
}

/// Scoreboard counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareStats {
    pub matched: u64,
    pub mismatched: u64,

    /// Comparisons skipped because one side had no value
    pub skipped: u64,

    /// Counters keyed by comparison source, in first-seen order
    pub sources: IndexMap<String, SourceStats>,
}

impl CompareStats {
    /// Number of comparisons actually evaluated.
    pub fn compared(&self) -> u64 {
        self.matched + self.mismatched
    }

    pub fn record_match(&mut self, source: &str) {
        self.matched += 1;
        self.source(source).matched += 1;
    }

    pub fn record_mismatch(&mut self, source: &str) {
        self.mismatched += 1;
        self.source(source).mismatched += 1;
    }

    pub fn record_skip(&mut self, source: &str) {
        self.skipped += 1;
        self.source(source).skipped += 1;
    }

    fn source(&mut self, source: &str) -> &mut SourceStats {
        self.sources.entry(source.to_string()).or_default()
    }
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Cycles stepped per wall-clock second
    pub cycles_per_second: f64,

    /// Task polls per wall-clock second
    pub polls_per_second: f64,
}

impl BenchStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self {
            metadata: RunMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Sets the run name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(unix_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(unix_now());
    }

    /// Returns true if no comparison mismatched.
    pub fn passed(&self) -> bool {
        self.compare.mismatched == 0
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.cycles_per_second = self.scheduler.cycles as f64 / seconds;
            self.timing.polls_per_second = self.scheduler.polls as f64 / seconds;
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Scoreboard counters as CSV: one row per source, then a `total` row.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("source,matched,mismatched,skipped\n");
        let rows = self
            .compare
            .sources
            .iter()
            .map(|(source, s)| (source.as_str(), s.matched, s.mismatched, s.skipped))
            .chain(std::iter::once((
                "total",
                self.compare.matched,
                self.compare.mismatched,
                self.compare.skipped,
            )));
        for (source, matched, mismatched, skipped) in rows {
            csv.push_str(&format!("{source},{matched},{mismatched},{skipped}\n"));
        }
        csv
    }

    /// Writes `<name>.json` and `<name>.csv` under `dir`, creating it if
    /// needed. Returns the JSON path.
    pub fn write_report(&self, dir: &Path) -> BenchResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stem = if self.metadata.name.is_empty() {
            "bench"
        } else {
            self.metadata.name.as_str()
        };
        let json_path = dir.join(format!("{stem}.json"));
        std::fs::write(&json_path, self.to_json()?)?;
        std::fs::write(dir.join(format!("{stem}.csv")), self.to_csv())?;
        Ok(json_path)
    }

    /// Reads back a report written by [`write_report`](Self::write_report).
    pub fn from_json_file(path: &Path) -> BenchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BenchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASSED" } else { "FAILED" };
        let name = if self.metadata.name.is_empty() {
            "testbench"
        } else {
            self.metadata.name.as_str()
        };
        writeln!(f, "{name}: {verdict}")?;
        writeln!(
            f,
            "cycles {} | settle passes {} | priority drained {} | tasks {}",
            self.scheduler.cycles,
            self.scheduler.settle_passes,
            self.scheduler.priority_drained,
            self.scheduler.tasks_spawned
        )?;
        writeln!(
            f,
            "compared {} | matched {} | mismatched {} | skipped {}",
            self.compare.compared(),
            self.compare.matched,
            self.compare.mismatched,
            self.compare.skipped
        )?;
        for (source, s) in &self.compare.sources {
            writeln!(f, "  {source}: {}/{} matched", s.matched, s.matched + s.mismatched)?;
        }
        write!(
            f,
            "{:.2} ms, {:.0} cycles/s",
            self.timing.total_wall_time_ms, self.timing.cycles_per_second
        )
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct WallTimer {
    start: std::time::Instant,
}

impl WallTimer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for WallTimer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

/// Collects statistics across one run.
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: BenchStats,
    timer: Option<WallTimer>,
}

impl StatsCollector {
    /// Creates a new collector.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stats: BenchStats::new().with_name(name),
            timer: None,
        }
    }

    /// Starts timing.
    pub fn start(&mut self) {
        self.timer = Some(WallTimer::start());
        self.stats.record_start();
    }

    /// Stops timing and folds in the final counters.
    pub fn stop(&mut self, scheduler: SchedulerStats, compare: CompareStats) {
        self.stats.record_end();
        self.stats.scheduler = scheduler;
        self.stats.compare = compare;
        if let Some(ref timer) = self.timer {
            self.stats.compute_timing(timer.elapsed_ms());
        }
    }

    /// Returns the collected statistics.
    pub fn stats(&self) -> &BenchStats {
        &self.stats
    }

    /// Consumes the collector and returns the statistics.
    pub fn into_stats(self) -> BenchStats {
        self.stats
    }
}
