//! Run results: per-step outcomes, per-scenario verdicts and the suite report
//!
//! The JSON form is the machine-readable artifact of a run; the colored
//! printers below are the human log.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use super::assert::AssertionFailure;
use super::config::{ScenarioClass, ScenarioSpec};
use crate::common::{Error, Result};

/// Harness-level problem that stopped a step (not an assertion mismatch)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
}

impl StepError {
    pub fn new(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            iteration: None,
        }
    }
}

/// What happened when one step ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub method: String,
    /// Last URL requested by this step
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Status of the last response; absent when nothing was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Decoded body of the last response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub elapsed_ms: u64,
    /// Number of requests issued by a bulk step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<AssertionFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty() && self.error.is_none()
    }

    /// First reason this step did not pass
    pub fn first_problem(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.message.clone());
        }
        self.failures.first().map(ToString::to_string)
    }
}

/// Verdict of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    /// Cut short by the suite timeout
    Aborted,
    /// Stopped by a suite-fatal error
    Errored,
    /// Never started because the suite stopped early
    Skipped,
}

/// Aggregate result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub id: String,
    pub name: String,
    pub class: ScenarioClass,
    pub status: ScenarioStatus,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    fn empty(scenario: &ScenarioSpec, status: ScenarioStatus, reason: Option<String>) -> Self {
        Self {
            id: scenario.id.clone(),
            name: scenario.name.clone(),
            class: scenario.class,
            status,
            steps: Vec::new(),
            first_failure: reason,
            duration_ms: 0,
        }
    }

    /// Passed or failed, judged from the step outcomes
    pub fn from_steps(scenario: &ScenarioSpec, steps: Vec<StepOutcome>, elapsed: Duration) -> Self {
        let first_failure = steps.iter().enumerate().find_map(|(i, step)| {
            step.first_problem()
                .map(|problem| format!("step {} ({}): {}", i + 1, step.name, problem))
        });
        let status = if first_failure.is_some() {
            ScenarioStatus::Failed
        } else {
            ScenarioStatus::Passed
        };

        Self {
            duration_ms: elapsed.as_millis() as u64,
            steps,
            first_failure,
            ..Self::empty(scenario, status, None)
        }
    }

    /// Cut short; `steps` holds the steps that finished before the cut
    pub fn aborted(
        scenario: &ScenarioSpec,
        reason: impl Into<String>,
        steps: Vec<StepOutcome>,
        elapsed: Duration,
    ) -> Self {
        Self {
            duration_ms: elapsed.as_millis() as u64,
            steps,
            ..Self::empty(scenario, ScenarioStatus::Aborted, Some(reason.into()))
        }
    }

    pub fn errored(
        scenario: &ScenarioSpec,
        error: &Error,
        steps: Vec<StepOutcome>,
        elapsed: Duration,
    ) -> Self {
        Self {
            duration_ms: elapsed.as_millis() as u64,
            steps,
            ..Self::empty(scenario, ScenarioStatus::Errored, Some(error.to_string()))
        }
    }

    pub fn skipped(scenario: &ScenarioSpec, reason: impl Into<String>) -> Self {
        Self::empty(scenario, ScenarioStatus::Skipped, Some(reason.into()))
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Scenario counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Totals {
    pub fn count(results: &[ScenarioResult]) -> Self {
        let mut totals = Totals {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                ScenarioStatus::Passed => totals.passed += 1,
                ScenarioStatus::Failed => totals.failed += 1,
                ScenarioStatus::Aborted => totals.aborted += 1,
                ScenarioStatus::Errored => totals.errored += 1,
                ScenarioStatus::Skipped => totals.skipped += 1,
            }
        }
        totals
    }
}

/// Everything a suite run produced
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub base_url: String,
    /// Unix timestamp (seconds) of the start of the run
    pub started_at: u64,
    pub duration_ms: u64,
    pub totals: Totals,
    /// Suite-fatal error that stopped the run early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub scenarios: Vec<ScenarioResult>,
}

impl SuiteReport {
    /// True when every selected scenario passed and nothing was fatal
    pub fn success(&self) -> bool {
        self.fatal.is_none() && self.totals.passed == self.totals.total
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

/// Print the header line of a run
pub fn print_header(suite: &str, base_url: &str, scenarios: usize) {
    println!(
        "\n{} {}",
        "Running Suite:".blue().bold(),
        suite.white().bold()
    );
    println!(
        "  {} scenario(s) against {}",
        scenarios,
        base_url.dimmed()
    );
}

/// Print one finished scenario
pub fn print_scenario(result: &ScenarioResult, verbose: bool) {
    let mark = match result.status {
        ScenarioStatus::Passed => "✓".green(),
        ScenarioStatus::Failed | ScenarioStatus::Errored => "✗".red(),
        ScenarioStatus::Aborted => "⏱".yellow(),
        ScenarioStatus::Skipped => "-".dimmed(),
    };
    println!(
        "  {} {} {} {}",
        mark,
        result.id.dimmed(),
        result.name,
        format!("({}ms)", result.duration_ms).dimmed()
    );

    for (i, step) in result.steps.iter().enumerate() {
        let show = verbose || !step.passed();
        if verbose {
            let status = step
                .status
                .map_or_else(|| "---".to_string(), |s| s.to_string());
            let mark = if step.passed() { "✓".green() } else { "✗".red() };
            let iterations = step
                .iterations
                .map(|n| format!(" x{}", n))
                .unwrap_or_default();
            println!(
                "      {} Step {}: {} {}{}",
                mark,
                i + 1,
                step.name,
                status.dimmed(),
                iterations.dimmed()
            );
        }
        if !show {
            continue;
        }
        if let Some(error) = &step.error {
            println!("        {} Step {}: {}", "✗".red(), i + 1, error.message);
        }
        for failure in &step.failures {
            println!("        {} Step {}: {}", "✗".red(), i + 1, failure);
        }
    }

    for step in &result.steps {
        for warning in &step.warnings {
            println!("        {} {}", "!".yellow(), warning.yellow());
        }
    }

    if result.steps.is_empty() {
        if let Some(reason) = &result.first_failure {
            println!("        {}", reason.dimmed());
        }
    }
}

/// Print the closing summary of a run
pub fn print_summary(report: &SuiteReport) {
    let totals = &report.totals;
    println!();
    if let Some(fatal) = &report.fatal {
        println!("{} {}", "Fatal:".red().bold(), fatal);
    }

    let headline = if report.success() {
        "✓ Suite passed".green().bold()
    } else {
        "✗ Suite failed".red().bold()
    };
    println!(
        "{}  {} passed, {} failed, {} aborted, {} errored, {} skipped ({} total) in {:.1}s",
        headline,
        totals.passed.to_string().green(),
        totals.failed.to_string().red(),
        totals.aborted.to_string().yellow(),
        totals.errored,
        totals.skipped,
        totals.total,
        report.duration_ms as f64 / 1000.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::config::SuiteSpec;

    fn scenario() -> ScenarioSpec {
        SuiteSpec::from_yaml(
            r#"
name: t
bootstrap:
  method: POST
  path: /challenger
  bind: { challengeToken: { header: x-challenger } }
scenarios:
  - id: "02"
    name: get todos
    steps:
      - { action: request, method: GET, path: /todos }
"#,
        )
        .unwrap()
        .scenarios
        .remove(0)
    }

    #[test]
    fn test_scenario_status_from_steps() {
        let scenario = scenario();
        let ok = StepOutcome {
            name: "GET /todos".into(),
            status: Some(200),
            ..Default::default()
        };
        let result = ScenarioResult::from_steps(&scenario, vec![ok.clone()], Duration::from_millis(5));
        assert!(result.passed());
        assert!(result.first_failure.is_none());

        let broken = StepOutcome {
            name: "DELETE".into(),
            error: Some(StepError::new(&Error::missing_capture("todoId"))),
            ..Default::default()
        };
        let result = ScenarioResult::from_steps(&scenario, vec![ok, broken], Duration::ZERO);
        assert_eq!(result.status, ScenarioStatus::Failed);
        assert!(result
            .first_failure
            .unwrap()
            .starts_with("step 2 (DELETE): Capture 'todoId'"));
    }

    #[test]
    fn test_report_success_and_json() {
        let scenario = scenario();
        let results = vec![
            ScenarioResult::from_steps(&scenario, Vec::new(), Duration::ZERO),
            ScenarioResult::aborted(&scenario, "suite timeout", Vec::new(), Duration::ZERO),
        ];
        let report = SuiteReport {
            suite: "t".into(),
            base_url: "http://h".into(),
            started_at: 0,
            duration_ms: 1,
            totals: Totals::count(&results),
            fatal: None,
            scenarios: results,
        };
        assert_eq!(report.totals.aborted, 1);
        assert!(!report.success());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        report.write_json(&path).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["totals"]["total"], 2);
        assert_eq!(written["scenarios"][1]["status"], "aborted");
    }
}
