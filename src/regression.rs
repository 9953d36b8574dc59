//! Regression runner for independent testbench sessions.
//!
//! A session owns its own [`Runtime`](crate::runtime::Runtime) and [`Scheduler`], so nothing is
//! shared between sessions and each one can run on its own thread. With
//! the `parallel` feature sessions are spread over a rayon pool; without
//! it they run one after another.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use std::future::Future;

use serde::Serialize;

use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};
use crate::scheduler::Scheduler;
use crate::stats::BenchStats;

/// Outcome of one session.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub stats: Option<BenchStats>,
}

impl SessionReport {
    fn from_result(name: String, result: BenchResult<BenchStats>) -> Self {
        match result {
            Ok(stats) => Self {
                name,
                passed: stats.passed(),
                error: None,
                stats: Some(stats),
            },
            Err(e) => Self {
                name,
                passed: false,
                error: Some(e.to_string()),
                stats: None,
            },
        }
    }
}

/// Runs one session to completion on the current thread.
///
/// With `simulation.report_dir` set, the session's stats are written there
/// as soon as the run finishes, whether or not the test body succeeded.
pub fn run_session<F, Fut>(config: BenchConfig, test: F) -> BenchResult<BenchStats>
where
    F: FnOnce(Scheduler) -> Fut,
    Fut: Future<Output = BenchResult<()>> + 'static,
{
    let report_dir = config.simulation.report_dir.clone();
    let (result, stats) = crate::run(config, test)?;
    if let Some(dir) = report_dir {
        let path = stats.write_report(&dir)?;
        tracing::debug!(report = %path.display(), "session report written");
    }
    result.map(|()| stats)
}

/// Runs a list of sessions, one config each.
pub struct Regression {
    configs: Vec<BenchConfig>,
    num_threads: usize,
}

impl Regression {
    pub fn new(configs: Vec<BenchConfig>) -> Self {
        Self {
            configs,
            num_threads: 0,
        }
    }

    /// Sets the worker count. 0 uses rayon's default.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    pub fn threads(&self) -> usize {
        self.num_threads
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Runs every session sequentially.
    #[cfg(not(feature = "parallel"))]
    pub fn run<F, Fut>(self, test: F) -> Vec<SessionReport>
    where
        F: Fn(Scheduler) -> Fut + Sync,
        Fut: Future<Output = BenchResult<()>> + 'static,
    {
        self.configs
            .into_iter()
            .map(|config| {
                let name = config.simulation.name.clone();
                SessionReport::from_result(name, run_session(config, &test))
            })
            .collect()
    }

    /// Runs every session on the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn run<F, Fut>(self, test: F) -> Vec<SessionReport>
    where
        F: Fn(Scheduler) -> Fut + Sync,
        Fut: Future<Output = BenchResult<()>> + 'static,
    {
        if self.num_threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build_global()
                .ok(); // already configured
        }

        self.configs
            .into_par_iter()
            .map(|config| {
                let name = config.simulation.name.clone();
                SessionReport::from_result(name, run_session(config, &test))
            })
            .collect()
    }
}

/// Collapses reports into one result: the first failure, if any.
pub fn ensure_passed(reports: &[SessionReport]) -> BenchResult<()> {
    match reports.iter().find(|r| !r.passed) {
        Some(report) => Err(BenchError::Validation(format!(
            "session {} failed: {}",
            report.name,
            report.error.as_deref().unwrap_or("comparison mismatches")
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut::CountingDut;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn config(name: &str, max_cycles: Option<u64>) -> BenchConfig {
        let mut config = BenchConfig::default();
        config.simulation.name = name.to_string();
        config.simulation.max_cycles = max_cycles;
        config
    }

    async fn ten_cycles(sched: Scheduler) -> BenchResult<()> {
        sched.start_clock(Rc::new(RefCell::new(CountingDut::new())))?;
        sched.clock_cycles(10).await;
        Ok(())
    }

    #[test]
    fn test_sessions_are_independent() {
        let reports = Regression::new(vec![config("a", None), config("b", None)])
            .with_threads(2)
            .run(ten_cycles);

        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert!(report.passed);
            assert_eq!(report.stats.as_ref().unwrap().scheduler.cycles, 11);
        }
        assert!(ensure_passed(&reports).is_ok());
    }

    #[test]
    fn test_sessions_write_reports() {
        let dir = tempfile::TempDir::new().unwrap();
        let configs = ["first", "second"]
            .iter()
            .map(|name| {
                BenchConfig::builder()
                    .name(*name)
                    .report_dir(dir.path())
                    .build()
                    .unwrap()
            })
            .collect();

        let reports = Regression::new(configs).run(ten_cycles);
        assert!(ensure_passed(&reports).is_ok());

        for report in &reports {
            let path = dir.path().join(format!("{}.json", report.name));
            let written = BenchStats::from_json_file(&path).unwrap();
            assert_eq!(written.metadata.name, report.name);
            assert_eq!(written.scheduler.cycles, 11);
            assert!(dir.path().join(format!("{}.csv", report.name)).exists());
        }
    }

    #[test]
    fn test_failed_session_reported() {
        let reports = Regression::new(vec![config("ok", None), config("short", Some(3))])
            .run(ten_cycles);

        assert!(reports[0].passed);
        assert!(!reports[1].passed);
        assert!(reports[1].error.as_deref().unwrap().contains("max_cycles = 3"));
        assert!(ensure_passed(&reports).is_err());
    }
}
