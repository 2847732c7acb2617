//! Request executor
//!
//! A `Transport` issues one HTTP request and hands back the raw response.
//! Any well-formed response, whatever its status, is valid test data; only
//! network-level failures surface as `Error::Transport`.

mod executor;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::ContentType;
use crate::common::Result;

pub use executor::HttpExecutor;

/// Methods a step may use
pub const SUPPORTED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

/// Header that asks the server to treat a POST as another verb
pub const METHOD_OVERRIDE_HEADER: &str = "X-HTTP-Method-Override";

/// A fully resolved request, ready to send
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Upper-case method name
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Value of a request header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, headers and undecoded body of a response
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    /// Lower-cased header names; repeated headers joined with ", "
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Value of a response header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Declared content type, if any
    pub fn content_type(&self) -> Option<ContentType> {
        self.header("content-type").map(ContentType::parse)
    }
}

/// Sends requests on behalf of the runner
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse>;
}

/// Methods that may be retried after a transport failure
///
/// PUT and DELETE are idempotent in HTTP terms, but the remote store is
/// stateful, so only read-only verbs are retried.
pub fn is_retryable(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS" | "TRACE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_methods() {
        for m in ["GET", "HEAD", "OPTIONS", "TRACE"] {
            assert!(is_retryable(m), "{m}");
        }
        for m in ["POST", "PUT", "DELETE", "PATCH"] {
            assert!(!is_retryable(m), "{m}");
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = RawResponse::default();
        response
            .headers
            .insert("x-challenger".into(), "abc".into());
        response
            .headers
            .insert("content-type".into(), "application/xml".into());

        assert_eq!(response.header("X-Challenger"), Some("abc"));
        assert_eq!(response.content_type(), Some(ContentType::Xml));
    }
}
