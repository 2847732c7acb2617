//! reqwest-backed transport with bounded retry for read-only verbs

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tracing::{debug, warn};

use super::{is_retryable, HttpRequest, RawResponse, Transport};
use crate::common::config::RetryConfig;
use crate::common::{Error, Result};

/// Upper bound on the delay between two retries
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Sends requests over HTTP(S) with a shared connection pool
pub struct HttpExecutor {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpExecutor {
    pub fn new(retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("restcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, retry })
    }

    async fn send_once(&self, request: &HttpRequest) -> std::result::Result<RawResponse, String> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| format!("invalid method: {}", e))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(describe)?;
        let status = response.status().as_u16();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.clone());
        }

        let body = response.bytes().await.map_err(describe)?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpExecutor {
    async fn execute(&self, request: &HttpRequest) -> Result<RawResponse> {
        debug!(method = %request.method, url = %request.url, "sending request");
        check_request(request)?;

        let response = with_retry(&request.method, &self.retry, move || self.send_once(request))
            .await
            .map_err(|reason| Error::transport(&request.method, &request.url, reason))?;

        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            bytes = response.body.len(),
            "received response"
        );
        Ok(response)
    }
}

/// Run `send`, retrying with exponential backoff when the method allows it
pub(crate) async fn with_retry<T, F, Fut>(
    method: &str,
    policy: &RetryConfig,
    mut send: F,
) -> std::result::Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let attempts = if is_retryable(method) {
        policy.max_attempts.max(1)
    } else {
        1
    };
    let mut delay = Duration::from_millis(policy.backoff_ms).min(MAX_BACKOFF);
    let mut attempt = 1;

    loop {
        match send().await {
            Ok(value) => return Ok(value),
            Err(reason) if attempt < attempts => {
                warn!(
                    method,
                    attempt,
                    max_attempts = attempts,
                    %reason,
                    "transport failure, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = next_backoff(delay);
                attempt += 1;
            }
            Err(reason) if attempts > 1 => {
                return Err(format!("{} (after {} attempts)", reason, attempts))
            }
            Err(reason) => return Err(reason),
        }
    }
}

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_BACKOFF)
}

/// Reject requests reqwest could never build
///
/// A bad method, URL or header comes from the suite, not the network, so it
/// is a definition error: never retried and never fatal.
fn check_request(request: &HttpRequest) -> Result<()> {
    let context = || format!("{} {}", request.method, request.url);

    Method::from_bytes(request.method.as_bytes())
        .map_err(|e| Error::Definition(format!("{}: invalid method: {}", context(), e)))?;
    Url::parse(&request.url)
        .map_err(|e| Error::Definition(format!("{}: invalid URL: {}", context(), e)))?;
    for (name, value) in &request.headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            Error::Definition(format!("{}: invalid header name {:?}", context(), name))
        })?;
        HeaderValue::from_str(value).map_err(|_| {
            Error::Definition(format!("{}: invalid value for header '{}'", context(), name))
        })?;
    }
    Ok(())
}

fn describe(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_get_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry("GET", &policy(), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("connection reset".to_string())
            } else {
                Ok(200u16)
            }
        })
        .await;

        assert_eq!(result, Ok(200));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_get_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: std::result::Result<u16, String> =
            with_retry("HEAD", &policy(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("connection refused".to_string())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn test_post_is_never_retried() {
        for method in ["POST", "PUT", "DELETE", "PATCH"] {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let result: std::result::Result<u16, String> =
                with_retry(method, &policy(), move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("connection reset".to_string())
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), 1, "{method}");
            assert_eq!(result.unwrap_err(), "connection reset");
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let executor = HttpExecutor::new(RetryConfig {
            max_attempts: 1,
            backoff_ms: 1,
        })
        .unwrap();
        let request = HttpRequest {
            method: "GET".into(),
            url: "http://127.0.0.1:9/todos".into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(2),
        };

        let err = executor.execute(&request).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn test_bad_header_is_definition_error() {
        let executor = HttpExecutor::new(policy()).unwrap();
        let request = HttpRequest {
            method: "GET".into(),
            url: "http://127.0.0.1:9/todos".into(),
            headers: vec![("Bad Header".into(), "x".into())],
            body: None,
            timeout: Duration::from_secs(2),
        };

        let err = executor.execute(&request).await.unwrap_err();
        assert_eq!(err.code(), "DEFINITION");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Bad Header"));
    }

    #[test]
    fn test_bad_url_is_definition_error() {
        let request = HttpRequest {
            method: "GET".into(),
            url: "not a url/todos".into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(2),
        };
        assert!(matches!(check_request(&request), Err(Error::Definition(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(next_backoff(Duration::from_millis(200)), Duration::from_millis(400));
        assert_eq!(next_backoff(Duration::from_secs(20)), MAX_BACKOFF);
        assert_eq!(next_backoff(Duration::MAX), MAX_BACKOFF);
    }
}
