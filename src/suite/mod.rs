//! Declarative conformance suites
//!
//! A suite is a YAML table of scenarios. Each scenario is an ordered list of
//! HTTP steps with expectations on status, headers and the decoded body.

pub mod assert;
pub mod config;
pub mod orchestrator;
pub mod path;
pub mod report;
pub mod request;
pub mod runner;
pub mod template;

pub use assert::{AssertionEngine, AssertionFailure, Facet, ResponseView};
pub use config::{ScenarioClass, ScenarioSpec, StepSpec, SuiteSpec};
pub use orchestrator::{schedule, ScenarioFilter, SuiteOrchestrator};
pub use report::{ScenarioResult, ScenarioStatus, StepOutcome, SuiteReport};
pub use runner::ScenarioRunner;
