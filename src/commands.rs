//! CLI command definitions
//!
//! Defines the clap commands for the restcheck CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a suite against a live service
    Run {
        /// Path to the YAML suite file
        suite: PathBuf,

        /// Base URL of the service under test (overrides the suite and config file)
        #[arg(long)]
        base_url: Option<String>,

        /// Maximum number of independent scenarios in flight
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Suite timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Where to write the JSON report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Only run scenarios with this tag (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,

        /// Only run the scenario with this id (repeatable)
        #[arg(long)]
        only: Vec<String>,

        /// Suppress per-scenario progress lines
        #[arg(long, short)]
        quiet: bool,
    },

    /// Check a suite definition without sending any request
    Validate {
        /// Path to the YAML suite file
        suite: PathBuf,
    },

    /// List the scenarios of a suite
    List {
        /// Path to the YAML suite file
        suite: PathBuf,
    },
}
