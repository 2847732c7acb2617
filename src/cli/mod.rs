//! CLI command handling
//!
//! Loads configuration and suites, runs them, and formats output.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::paths::report_dir;
use crate::common::Result;
use crate::http::HttpExecutor;
use crate::suite::config::SuiteSpec;
use crate::suite::report::print_summary;
use crate::suite::{ScenarioClass, ScenarioFilter, SuiteOrchestrator};

/// Dispatch a CLI command
///
/// Returns whether the command succeeded; a suite with failing scenarios is
/// not an error but still yields `false`.
pub async fn dispatch(command: Commands, verbose: bool) -> Result<bool> {
    match command {
        Commands::Run {
            suite,
            base_url,
            concurrency,
            timeout,
            report,
            tags,
            only,
            quiet,
        } => {
            let mut config = Config::load()?;
            if let Some(concurrency) = concurrency {
                config.runner.concurrency = concurrency;
            }
            if let Some(timeout) = timeout {
                config.timeouts.suite_secs = timeout;
            }

            let spec = SuiteSpec::load(&suite)?;
            let base_url = resolve_base_url(base_url, &spec, &config);
            let report_path = report
                .or_else(|| config.report.path.clone())
                .or_else(default_report_path);

            let transport = Arc::new(HttpExecutor::new(config.retry.clone())?);
            let report = SuiteOrchestrator::new(transport, config, base_url)
                .with_filter(ScenarioFilter { tags, only })
                .verbose(verbose)
                .quiet(quiet)
                .run(&spec)
                .await?;

            print_summary(&report);
            if let Some(path) = report_path {
                report.write_json(&path)?;
                println!("Report written to {}", path.display().to_string().dimmed());
            }

            Ok(report.success())
        }

        Commands::Validate { suite } => {
            let spec = SuiteSpec::load(&suite)?;
            spec.validate()?;
            println!(
                "{} {} is valid: {} scenario(s), {} step(s)",
                "✓".green(),
                spec.name.white().bold(),
                spec.scenarios.len(),
                spec.step_count()
            );
            Ok(true)
        }

        Commands::List { suite } => {
            let spec = SuiteSpec::load(&suite)?;
            println!("{}", spec.name.white().bold());
            if let Some(description) = &spec.description {
                println!("  {}", description.dimmed());
            }
            println!();

            for scenario in &spec.scenarios {
                let class = match scenario.class {
                    ScenarioClass::Independent => "".normal(),
                    ScenarioClass::Cumulative => " [cumulative]".yellow(),
                };
                let tags = if scenario.tags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", scenario.tags.join(", "))
                };
                println!(
                    "  {:>4}  {}{}{}",
                    scenario.id.cyan(),
                    scenario.name,
                    class,
                    tags.dimmed()
                );
            }
            Ok(true)
        }
    }
}

/// `--base-url` wins over the suite file, which wins over the config file
pub fn resolve_base_url(flag: Option<String>, suite: &SuiteSpec, config: &Config) -> String {
    flag.or_else(|| suite.base_url.clone())
        .unwrap_or_else(|| config.target.base_url.clone())
}

/// Default location of the JSON report
pub fn default_report_path() -> Option<PathBuf> {
    report_dir().map(|dir| dir.join("latest.json"))
}
