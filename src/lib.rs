//! restcheck - declarative HTTP API conformance harness
//!
//! Suites are YAML tables of scenarios. The orchestrator acquires session
//! credentials once, runs every scenario's steps through a [`http::Transport`],
//! checks status, header and body expectations on the decoded response, and
//! produces a [`suite::SuiteReport`].

pub mod cli;
pub mod codec;
pub mod commands;
pub mod common;
pub mod http;
pub mod session;
pub mod suite;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use session::SessionContext;
pub use suite::{SuiteOrchestrator, SuiteReport, SuiteSpec};
