//! Session context
//!
//! Per-run credential cache. The bootstrap request seeds it exactly once;
//! afterwards it is read by every step that interpolates a credential and
//! written only by steps that declare a `bind`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::common::{Error, Result};
use crate::http::Transport;
use crate::suite::assert::{AssertionEngine, ResponseView};
use crate::suite::config::BootstrapSpec;
use crate::suite::path::to_text;
use crate::suite::request::{build_request, decode_body};
use crate::suite::template::Scope;

/// Result of writing a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The key was not bound before
    Bound,
    /// An existing value was replaced by an explicit rebind
    Rebound,
    /// The key was already bound and the existing value was kept
    Kept,
}

/// Credentials shared by every scenario of one suite run
#[derive(Debug, Default)]
pub struct SessionContext {
    bindings: RwLock<HashMap<String, String>>,
}

impl SessionContext {
    pub fn new(bindings: HashMap<String, String>) -> Self {
        Self {
            bindings: RwLock::new(bindings),
        }
    }

    /// Run the bootstrap request and seed the session from its response
    pub async fn acquire(
        bootstrap: &BootstrapSpec,
        transport: &dyn Transport,
        base_url: &str,
        engine: &AssertionEngine,
        timeout: Duration,
    ) -> Result<Self> {
        let empty_session = HashMap::new();
        let empty_captures = HashMap::new();
        let scope = Scope::new(&empty_session, &empty_captures);

        let timeout = bootstrap
            .request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(timeout);
        let request = build_request(&bootstrap.request, base_url, &BTreeMap::new(), &scope, timeout)
            .map_err(|e| Error::Bootstrap(e.to_string()))?;

        info!(method = %request.method, url = %request.url, "acquiring session");
        let response = transport.execute(&request).await?;

        let body = match decode_body(&response) {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => {
                debug!(error = %e, "bootstrap body not decodable");
                None
            }
            None => None,
        };

        let failures = engine.check(&bootstrap.expect, &ResponseView::new(&response, body.as_ref()), &scope);
        if let Some(failure) = failures.iter().find(|f| !f.advisory) {
            return Err(Error::Bootstrap(failure.to_string()));
        }

        let mut bindings = HashMap::new();
        for (key, source) in &bootstrap.bind {
            let value = source
                .extract(&response, body.as_ref())
                .ok_or_else(|| Error::Bootstrap(format!("no {} to bind '{}'", source.describe(), key)))?;
            debug!(key = %key, "session key bound");
            bindings.insert(key.clone(), to_text(&value));
        }

        Ok(Self::new(bindings))
    }

    /// Value of a bound credential
    pub async fn get(&self, key: &str) -> Result<String> {
        self.bindings
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::missing_binding(key))
    }

    /// Bind or overwrite a credential unconditionally
    pub async fn set(&self, key: &str, value: impl Into<String>) {
        self.bindings.write().await.insert(key.to_string(), value.into());
    }

    /// Bind a credential, replacing an existing one only when `rebind` is set
    pub async fn bind(&self, key: &str, value: impl Into<String>, rebind: bool) -> BindOutcome {
        let mut bindings = self.bindings.write().await;
        if let Some(existing) = bindings.get_mut(key) {
            if !rebind {
                warn!(key, "session key already bound, keeping existing value");
                return BindOutcome::Kept;
            }
            *existing = value.into();
            return BindOutcome::Rebound;
        }
        bindings.insert(key.to_string(), value.into());
        BindOutcome::Bound
    }

    /// Copy of every binding, for template rendering
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.bindings.read().await.clone()
    }
}
