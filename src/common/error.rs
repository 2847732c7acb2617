//! Error types for the conformance harness
//!
//! Only transport failures and internal defects abort a suite. Assertion
//! mismatches are data (see `suite::assert::AssertionFailure`), not errors.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Transport Errors ===
    #[error("{method} {url} failed: {reason}")]
    Transport {
        method: String,
        url: String,
        reason: String,
    },

    // === Payload Errors ===
    #[error(transparent)]
    Codec(#[from] CodecError),

    // === Data-flow Errors ===
    #[error("Session key '{key}' is not bound")]
    MissingBinding { key: String },

    #[error("Capture '{name}' was never produced by an earlier step")]
    MissingCapture { name: String },

    #[error("Invalid suite definition: {0}")]
    Definition(String),

    #[error("Session bootstrap failed: {0}")]
    Bootstrap(String),

    // === Timeout Errors ===
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transport error for a request
    pub fn transport(method: &str, url: &str, reason: impl ToString) -> Self {
        Self::Transport {
            method: method.to_string(),
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a missing binding error
    pub fn missing_binding(key: &str) -> Self {
        Self::MissingBinding {
            key: key.to_string(),
        }
    }

    /// Create a missing capture error
    pub fn missing_capture(name: &str) -> Self {
        Self::MissingCapture {
            name: name.to_string(),
        }
    }

    /// Whether this error must stop the whole suite
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Internal(_))
    }

    /// Short machine-readable code used in reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::Transport { .. } => "TRANSPORT",
            Error::Codec(_) => "CODEC",
            Error::MissingBinding { .. } => "MISSING_BINDING",
            Error::MissingCapture { .. } => "MISSING_CAPTURE",
            Error::Definition(_) => "DEFINITION",
            Error::Bootstrap(_) => "BOOTSTRAP",
            Error::Timeout(_) => "TIMEOUT",
            _ => "INTERNAL_ERROR",
        }
    }
}
