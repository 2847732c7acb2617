//! Configuration file handling

use serde::Deserialize;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Target service settings
    #[serde(default)]
    pub target: TargetConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Retry policy for idempotent requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scheduling and assertion settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Report output settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Target service settings
#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    /// Base URL every scenario path is resolved against
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "https://apichallenges.herokuapp.com".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Default timeout for a single request
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// Default per-request timeout inside bulk (`for_each`/`repeat`) steps
    #[serde(default = "default_bulk")]
    pub bulk_secs: u64,

    /// Wall-clock bound for the whole suite
    #[serde(default = "default_suite")]
    pub suite_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_secs: default_request(),
            bulk_secs: default_bulk(),
            suite_secs: default_suite(),
        }
    }
}

fn default_request() -> u64 {
    10
}
fn default_bulk() -> u64 {
    60
}
fn default_suite() -> u64 {
    600
}

/// Retry policy. Only GET, HEAD, OPTIONS and TRACE are ever retried.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on each further retry
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_backoff() -> u64 {
    200
}

/// How error-message lists are matched against expected entries
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMatch {
    /// An element must equal the expected message
    #[default]
    Exact,
    /// An element must contain the expected message
    Substring,
}

/// Scheduling and assertion settings
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Maximum number of independent scenarios in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Error-message matching mode
    #[serde(default)]
    pub error_match: ErrorMatch,

    /// Body path holding the error-message list
    #[serde(default = "default_error_path")]
    pub error_path: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            error_match: ErrorMatch::default(),
            error_path: default_error_path(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}
fn default_error_path() -> String {
    "errorMessages".to_string()
}

/// Report output settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ReportConfig {
    /// Where to write the JSON report when `--report` is not given
    pub path: Option<std::path::PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.request_secs, 10);
        assert_eq!(config.timeouts.bulk_secs, 60);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.runner.concurrency, 1);
        assert_eq!(config.runner.error_match, ErrorMatch::Exact);
        assert_eq!(config.runner.error_path, "errorMessages");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [target]
            base_url = "http://localhost:4567"

            [runner]
            concurrency = 4
            error_match = "substring"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.base_url, "http://localhost:4567");
        assert_eq!(config.runner.concurrency, 4);
        assert_eq!(config.runner.error_match, ErrorMatch::Substring);
        assert_eq!(config.runner.error_path, "errorMessages");
        assert_eq!(config.timeouts.suite_secs, 600);
    }

    #[test]
    fn test_invalid_file() {
        assert!(matches!(
            Config::parse("[runner]\nconcurrency = \"many\""),
            Err(super::super::Error::ConfigParse(_))
        ));
    }
}
