//! Suite orchestrator
//!
//! Acquires the session once, schedules the selected scenarios, enforces the
//! suite deadline and folds everything into a [`SuiteReport`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info};

use super::assert::AssertionEngine;
use super::config::{ScenarioClass, ScenarioSpec, SuiteSpec};
use super::report::{self, ScenarioResult, SuiteReport, Totals};
use super::runner::ScenarioRunner;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::http::Transport;
use crate::session::SessionContext;

/// Which scenarios of a suite to run
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    /// Keep scenarios carrying any of these tags
    pub tags: Vec<String>,
    /// Keep scenarios with these ids
    pub only: Vec<String>,
}

impl ScenarioFilter {
    pub fn matches(&self, scenario: &ScenarioSpec) -> bool {
        (self.tags.is_empty() || scenario.tags.iter().any(|t| self.tags.contains(t)))
            && (self.only.is_empty() || self.only.contains(&scenario.id))
    }
}

/// A group of scenarios executed together, by index into the selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub concurrent: bool,
    pub scenarios: Vec<usize>,
}

/// Split scenarios into execution phases
///
/// With a concurrency of 1 everything runs serially in declared order.
/// Otherwise independent scenarios that do not write the session run
/// concurrently first, then session-writing ones serially, then cumulative
/// scenarios serially in declared order.
pub fn schedule(scenarios: &[&ScenarioSpec], concurrency: usize) -> Vec<Phase> {
    if concurrency <= 1 {
        return vec![Phase {
            concurrent: false,
            scenarios: (0..scenarios.len()).collect(),
        }];
    }

    let pick = |wanted: fn(&ScenarioSpec) -> bool| -> Vec<usize> {
        scenarios
            .iter()
            .enumerate()
            .filter(|(_, s)| wanted(s))
            .map(|(i, _)| i)
            .collect()
    };

    let phases = [
        (true, pick(|s| s.class == ScenarioClass::Independent && !s.writes_session())),
        (false, pick(|s| s.class == ScenarioClass::Independent && s.writes_session())),
        (false, pick(|s| s.class == ScenarioClass::Cumulative)),
    ];

    phases
        .into_iter()
        .filter(|(_, indices)| !indices.is_empty())
        .map(|(concurrent, scenarios)| Phase {
            concurrent,
            scenarios,
        })
        .collect()
}

/// Runs a whole suite against one target
pub struct SuiteOrchestrator {
    transport: Arc<dyn Transport>,
    config: Config,
    base_url: String,
    filter: ScenarioFilter,
    verbose: bool,
    quiet: bool,
}

impl SuiteOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: Config, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            config,
            base_url: base_url.into(),
            filter: ScenarioFilter::default(),
            verbose: false,
            quiet: false,
        }
    }

    pub fn with_filter(mut self, filter: ScenarioFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Print every step, not just failing ones
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Suppress the human progress log
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Validate, bootstrap and run the selected scenarios
    pub async fn run(&self, suite: &SuiteSpec) -> Result<SuiteReport> {
        suite.validate()?;

        let selected: Vec<&ScenarioSpec> = suite
            .scenarios
            .iter()
            .filter(|s| self.filter.matches(s))
            .collect();
        let suite_secs = self.config.timeouts.suite_secs;
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let started = Instant::now();
        let deadline = started + Duration::from_secs(suite_secs);

        if !self.quiet {
            report::print_header(&suite.name, &self.base_url, selected.len());
        }

        let engine = AssertionEngine::from_config(&self.config.runner);
        let session = timeout_at(
            deadline,
            SessionContext::acquire(
                &suite.bootstrap,
                self.transport.as_ref(),
                &self.base_url,
                &engine,
                Duration::from_secs(self.config.timeouts.request_secs),
            ),
        )
        .await
        .map_err(|_| Error::Timeout(suite_secs))??;
        info!(suite = %suite.name, scenarios = selected.len(), "session acquired");

        let runner = ScenarioRunner::new(
            self.transport.clone(),
            engine,
            self.base_url.clone(),
            suite.default_headers.clone(),
            self.config.timeouts.clone(),
        );

        let concurrency = self.config.runner.concurrency.max(1);
        let mut results: Vec<Option<ScenarioResult>> = vec![None; selected.len()];
        let mut fatal: Option<Error> = None;

        for phase in schedule(&selected, concurrency) {
            if fatal.is_some() {
                break;
            }

            if phase.concurrent {
                let scenarios = selected.as_slice();
                let (runner, session) = (&runner, &session);
                let mut in_flight = stream::iter(phase.scenarios)
                    .map(move |i| async move {
                        (i, run_one(runner, scenarios[i], session, deadline, suite_secs).await)
                    })
                    .buffer_unordered(concurrency);

                while let Some((i, (result, err))) = in_flight.next().await {
                    self.progress(&result);
                    results[i] = Some(result);
                    if err.is_some() {
                        fatal = err;
                        break;
                    }
                }
            } else {
                for i in phase.scenarios {
                    let (result, err) = run_one(&runner, selected[i], &session, deadline, suite_secs).await;
                    self.progress(&result);
                    results[i] = Some(result);
                    if err.is_some() {
                        fatal = err;
                        break;
                    }
                }
            }
        }

        let fatal = fatal.map(|e| e.to_string());
        let scenarios: Vec<ScenarioResult> = results
            .into_iter()
            .zip(&selected)
            .map(|(result, scenario)| {
                result.unwrap_or_else(|| {
                    let reason = match &fatal {
                        Some(f) => format!("not run after fatal error: {}", f),
                        None => "not run".to_string(),
                    };
                    let skipped = ScenarioResult::skipped(scenario, reason);
                    self.progress(&skipped);
                    skipped
                })
            })
            .collect();

        let report = SuiteReport {
            suite: suite.name.clone(),
            base_url: self.base_url.clone(),
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            totals: Totals::count(&scenarios),
            fatal,
            scenarios,
        };
        info!(
            passed = report.totals.passed,
            total = report.totals.total,
            "suite finished"
        );
        Ok(report)
    }

    fn progress(&self, result: &ScenarioResult) {
        if !self.quiet {
            report::print_scenario(result, self.verbose);
        }
    }
}

/// Run one scenario under the suite deadline
///
/// Returns the error alongside the result when it must stop the suite.
async fn run_one(
    runner: &ScenarioRunner,
    scenario: &ScenarioSpec,
    session: &SessionContext,
    deadline: Instant,
    suite_secs: u64,
) -> (ScenarioResult, Option<Error>) {
    let started = Instant::now();
    if started >= deadline {
        let reason = format!("suite timeout of {}s reached before start", suite_secs);
        return (
            ScenarioResult::aborted(scenario, reason, Vec::new(), Duration::ZERO),
            None,
        );
    }

    let mut steps = Vec::with_capacity(scenario.steps.len());
    let outcome = timeout_at(deadline, runner.run_steps(scenario, session, &mut steps)).await;
    match outcome {
        Ok(Ok(())) => (ScenarioResult::from_steps(scenario, steps, started.elapsed()), None),
        Ok(Err(e)) => {
            error!(scenario = %scenario.id, error = %e, "scenario stopped by error");
            let result = ScenarioResult::errored(scenario, &e, steps, started.elapsed());
            let fatal = e.is_fatal().then_some(e);
            (result, fatal)
        }
        Err(_) => {
            let reason = format!(
                "suite timeout of {}s exceeded during step {}",
                suite_secs,
                steps.len() + 1
            );
            (ScenarioResult::aborted(scenario, reason, steps, started.elapsed()), None)
        }
    }
}
