//! restcheck - declarative HTTP API conformance harness
//!
//! Runs YAML scenario tables against a live HTTP service and reports every
//! divergence from the expected status, headers and body.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use restcheck::{cli, commands, common::logging};

#[derive(Parser)]
#[command(name = "restcheck", about = "Declarative HTTP API conformance harness")]
#[command(version, long_about = None)]
struct Cli {
    /// Print every step and enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_guard = logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let code = match cli::dispatch(cli.command, cli.verbose).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // flush the file log before exiting
    drop(log_guard);
    std::process::exit(code);
}
