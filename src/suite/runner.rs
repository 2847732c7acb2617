//! Scenario runner
//!
//! Executes the steps of one scenario strictly in order. A failed step does
//! not stop the scenario; a step whose templates need a capture that was
//! never produced is not sent and fails on its own. Only transport failures
//! propagate as `Err`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use super::assert::{AssertionEngine, AssertionFailure, ResponseView};
use super::config::{
    Expectation, ForEachStep, RepeatStep, RequestStep, RequestTemplate, ScenarioSpec, StepSpec,
    ValueSource,
};
use super::path::to_text;
use super::report::{ScenarioResult, StepError, StepOutcome};
use super::request::{build_request, decode_body};
use super::template::Scope;
use crate::codec::CodecError;
use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::http::{HttpRequest, RawResponse, Transport};
use crate::session::{BindOutcome, SessionContext};

/// One request/response round trip
struct Exchange {
    request: HttpRequest,
    response: RawResponse,
    body: Option<Value>,
    decode_error: Option<CodecError>,
    elapsed: Duration,
}

impl Exchange {
    fn view(&self) -> ResponseView<'_> {
        ResponseView::new(&self.response, self.body.as_ref())
    }
}

/// Runs scenarios against one target
pub struct ScenarioRunner {
    transport: Arc<dyn Transport>,
    engine: AssertionEngine,
    base_url: String,
    default_headers: BTreeMap<String, String>,
    timeouts: Timeouts,
}

impl ScenarioRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        engine: AssertionEngine,
        base_url: impl Into<String>,
        default_headers: BTreeMap<String, String>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            transport,
            engine,
            base_url: base_url.into(),
            default_headers,
            timeouts,
        }
    }

    /// Run every step of `scenario`
    pub async fn run(&self, scenario: &ScenarioSpec, session: &SessionContext) -> Result<ScenarioResult> {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(scenario.steps.len());
        self.run_steps(scenario, session, &mut outcomes).await?;
        Ok(ScenarioResult::from_steps(scenario, outcomes, started.elapsed()))
    }

    /// Run the steps of `scenario`, pushing each outcome once the step is complete
    ///
    /// `outcomes` keeps the finished steps when the caller cancels the run.
    pub async fn run_steps(
        &self,
        scenario: &ScenarioSpec,
        session: &SessionContext,
        outcomes: &mut Vec<StepOutcome>,
    ) -> Result<()> {
        let mut captures: HashMap<String, Value> = HashMap::new();

        for (i, step) in scenario.steps.iter().enumerate() {
            let mut outcome = StepOutcome {
                name: step.label(),
                method: step.request().method.to_ascii_uppercase(),
                ..Default::default()
            };

            match step {
                StepSpec::Request(s) => self.run_request(s, session, &mut captures, &mut outcome).await?,
                StepSpec::ForEach(s) => self.run_for_each(s, session, &captures, &mut outcome).await?,
                StepSpec::Repeat(s) => self.run_repeat(s, session, &captures, &mut outcome).await?,
            }

            debug!(
                scenario = %scenario.id,
                step = i + 1,
                status = ?outcome.status,
                failures = outcome.failures.len(),
                passed = outcome.passed(),
                "step finished"
            );
            outcomes.push(outcome);
        }

        Ok(())
    }

    async fn run_request(
        &self,
        step: &RequestStep,
        session: &SessionContext,
        captures: &mut HashMap<String, Value>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let values = session.snapshot().await;
        let scope = Scope::new(&values, captures);
        let timeout = self.timeout(&step.request, self.timeouts.request_secs);

        let exchange = match self.exchange(&step.request, &scope, timeout).await {
            Ok(exchange) => exchange,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                outcome.error = Some(StepError::new(&e));
                return Ok(());
            }
        };

        let needs_body = step.expect.needs_body()
            || step
                .capture
                .values()
                .chain(step.bind.values())
                .any(|s| matches!(s, ValueSource::Body(_)));
        self.judge(&exchange, &step.expect, &scope, needs_body, None, outcome);
        record(&exchange, outcome);

        let mut produced = Vec::new();
        for (name, source) in &step.capture {
            match source.extract(&exchange.response, exchange.body.as_ref()) {
                Some(value) => produced.push((name.clone(), value)),
                None => outcome
                    .warnings
                    .push(format!("capture '{}' not produced: no {}", name, source.describe())),
            }
        }
        captures.extend(produced);

        for (key, source) in &step.bind {
            let Some(value) = source.extract(&exchange.response, exchange.body.as_ref()) else {
                outcome
                    .warnings
                    .push(format!("session key '{}' not bound: no {}", key, source.describe()));
                continue;
            };
            if session.bind(key, to_text(&value), step.rebind).await == BindOutcome::Kept {
                outcome.warnings.push(format!(
                    "session key '{}' already bound; kept the existing value (use rebind: true to replace it)",
                    key
                ));
            }
        }

        Ok(())
    }

    async fn run_for_each(
        &self,
        step: &ForEachStep,
        session: &SessionContext,
        captures: &HashMap<String, Value>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let items = match captures.get(&step.over) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                let e = Error::Definition(format!(
                    "for_each over '{}' which holds {} instead of an array",
                    step.over, other
                ));
                outcome.error = Some(StepError::new(&e));
                return Ok(());
            }
            None => {
                outcome.error = Some(StepError::new(&Error::missing_capture(&step.over)));
                return Ok(());
            }
        };

        let values = session.snapshot().await;
        let base = Scope::new(&values, captures);
        let timeout = self.timeout(&step.request, self.timeouts.bulk_secs);
        let needs_body = step.expect.needs_body();
        let mut elapsed = Duration::ZERO;

        outcome.iterations = Some(0);
        for (index, item) in items.iter().enumerate() {
            let scope = base.iteration(index, Some(item));
            let exchange = match self.exchange(&step.request, &scope, timeout).await {
                Ok(exchange) => exchange,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    outcome.error = Some(StepError {
                        iteration: Some(index),
                        ..StepError::new(&e)
                    });
                    break;
                }
            };
            elapsed += exchange.elapsed;
            outcome.iterations = Some(index + 1);
            self.judge(&exchange, &step.expect, &scope, needs_body, Some(index), outcome);
            record(&exchange, outcome);
        }

        outcome.elapsed_ms = elapsed.as_millis() as u64;
        Ok(())
    }

    async fn run_repeat(
        &self,
        step: &RepeatStep,
        session: &SessionContext,
        captures: &HashMap<String, Value>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let values = session.snapshot().await;
        let base = Scope::new(&values, captures);
        let timeout = self.timeout(&step.request, self.timeouts.bulk_secs);
        let needs_body =
            step.expect.needs_body() || step.until.as_ref().is_some_and(Expectation::needs_body);
        let mut elapsed = Duration::ZERO;
        let mut satisfied = false;

        for index in 0..step.times {
            let scope = base.iteration(index, None);
            let exchange = match self.exchange(&step.request, &scope, timeout).await {
                Ok(exchange) => exchange,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    outcome.error = Some(StepError {
                        iteration: Some(index),
                        ..StepError::new(&e)
                    });
                    break;
                }
            };
            elapsed += exchange.elapsed;
            outcome.iterations = Some(index + 1);

            if let Some(until) = &step.until {
                let unmet = self.engine.check(until, &exchange.view(), &scope);
                if unmet.iter().all(|f| f.advisory) {
                    satisfied = true;
                    record(&exchange, outcome);
                    break;
                }
            }

            self.judge(&exchange, &step.expect, &scope, needs_body, Some(index), outcome);
            record(&exchange, outcome);
        }

        if step.until.is_some() && !satisfied && outcome.error.is_none() {
            outcome
                .failures
                .push(AssertionFailure::until_unmet(outcome.iterations.unwrap_or(0)));
        }
        outcome.elapsed_ms = elapsed.as_millis() as u64;
        Ok(())
    }

    async fn exchange(&self, template: &RequestTemplate, scope: &Scope<'_>, timeout: Duration) -> Result<Exchange> {
        let request = build_request(template, &self.base_url, &self.default_headers, scope, timeout)?;

        let started = Instant::now();
        let response = self.transport.execute(&request).await?;
        let elapsed = started.elapsed();

        let (body, decode_error) = match decode_body(&response) {
            Some(Ok(value)) => (Some(value), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };

        Ok(Exchange {
            request,
            response,
            body,
            decode_error,
            elapsed,
        })
    }

    /// Check one response and fold the verdicts into `outcome`
    fn judge(
        &self,
        exchange: &Exchange,
        expect: &Expectation,
        scope: &Scope<'_>,
        needs_body: bool,
        iteration: Option<usize>,
        outcome: &mut StepOutcome,
    ) {
        if let Some(e) = &exchange.decode_error {
            if needs_body {
                if outcome.error.is_none() {
                    outcome.error = Some(StepError {
                        iteration,
                        ..StepError::new(&Error::Codec(e.clone()))
                    });
                }
            } else {
                outcome.warnings.push(format!("response body ignored: {}", e));
            }
        }

        for failure in self.engine.check(expect, &exchange.view(), scope) {
            let failure = match iteration {
                Some(i) => failure.at_iteration(i),
                None => failure,
            };
            if failure.advisory {
                warn!(step = %outcome.name, "best-effort check failed: {}", failure);
                outcome.warnings.push(format!("{} (best effort)", failure));
            } else {
                outcome.failures.push(failure);
            }
        }
    }

    fn timeout(&self, template: &RequestTemplate, default_secs: u64) -> Duration {
        Duration::from_secs(template.timeout_secs.unwrap_or(default_secs))
    }
}

/// Keep the last response of a step for the report
fn record(exchange: &Exchange, outcome: &mut StepOutcome) {
    outcome.url = exchange.request.url.clone();
    outcome.status = Some(exchange.response.status);
    outcome.headers = exchange.response.headers.clone();
    outcome.body = exchange.body.clone();
    if outcome.iterations.is_none() {
        outcome.elapsed_ms = exchange.elapsed.as_millis() as u64;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::suite::config::SuiteSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory transport answering from a script of `(method, path prefix) -> response`
    pub(crate) struct Scripted {
        routes: Vec<(String, String, RawResponse)>,
        pub(crate) seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        pub(crate) fn new() -> Self {
            Self {
                routes: Vec::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn on(mut self, method: &str, path: &str, status: u16, body: Value) -> Self {
            let body = if body.is_null() {
                Vec::new()
            } else {
                serde_json::to_vec(&body).unwrap()
            };
            let response = RawResponse {
                status,
                headers: [("content-type".to_string(), "application/json".to_string())]
                    .into_iter()
                    .collect(),
                body,
            };
            self.routes.push((method.to_string(), path.to_string(), response));
            self
        }

        pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
            if let Some((_, _, response)) = self.routes.last_mut() {
                response.headers.insert(name.to_string(), value.to_string());
            }
            self
        }

        pub(crate) fn paths(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|r| format!("{} {}", r.method, r.url.trim_start_matches("http://api")))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn execute(&self, request: &HttpRequest) -> Result<RawResponse> {
            self.seen.lock().unwrap().push(request.clone());
            let path = request.url.trim_start_matches("http://api");
            self.routes
                .iter()
                .find(|(m, p, _)| *m == request.method && path.starts_with(p.as_str()))
                .map(|(_, _, r)| r.clone())
                .ok_or_else(|| Error::transport(&request.method, &request.url, "connection refused"))
        }
    }

    pub(crate) fn suite(scenarios: &str) -> SuiteSpec {
        let yaml = format!(
            r#"
name: test
bootstrap:
  method: POST
  path: /challenger
  bind:
    challengeToken: {{ header: x-challenger }}
default_headers:
  x-challenger: "{{{{challengeToken}}}}"
scenarios:
{}"#,
            scenarios
        );
        SuiteSpec::from_yaml(&yaml).unwrap()
    }

    fn runner(transport: Arc<Scripted>) -> ScenarioRunner {
        ScenarioRunner::new(
            transport,
            AssertionEngine::default(),
            "http://api",
            BTreeMap::from([("x-challenger".to_string(), "{{challengeToken}}".to_string())]),
            Timeouts::default(),
        )
    }

    fn session() -> SessionContext {
        SessionContext::new(HashMap::from([(
            "challengeToken".to_string(),
            "guid".to_string(),
        )]))
    }

    #[tokio::test]
    async fn test_create_then_delete_uses_captured_id() {
        let transport = Arc::new(
            Scripted::new()
                .on("POST", "/todos", 201, serde_json::json!({"id": 11, "title": "a"}))
                .on("DELETE", "/todos/11", 200, Value::Null)
                .on("GET", "/todos/11", 404, serde_json::json!({"errorMessages": ["Could not find an instance with todos/11"]})),
        );
        let spec = suite(
            r#"
  - id: "23"
    name: create delete get
    steps:
      - action: request
        method: POST
        path: /todos
        body: { title: a }
        expect: { status: 201 }
        capture: { todoId: { body: id } }
      - action: request
        method: DELETE
        path: /todos/{{capture.todoId}}
        expect: { status: 200 }
      - action: request
        method: GET
        path: /todos/{{capture.todoId}}
        expect: { status: 404 }
"#,
        );

        let result = runner(transport.clone())
            .run(&spec.scenarios[0], &session())
            .await
            .unwrap();

        assert!(result.passed(), "{:?}", result.first_failure);
        assert_eq!(
            transport.paths(),
            vec!["POST /todos", "DELETE /todos/11", "GET /todos/11"]
        );
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[1].header("x-challenger"), Some("guid"));
    }

    #[tokio::test]
    async fn test_missing_capture_fails_fast_and_later_steps_run() {
        let transport = Arc::new(
            Scripted::new()
                .on("POST", "/todos", 400, serde_json::json!({"errorMessages": ["title : field is mandatory"]}))
                .on("GET", "/todos", 200, serde_json::json!({"todos": []})),
        );
        let spec = suite(
            r#"
  - id: "x"
    name: failed create
    steps:
      - action: request
        method: POST
        path: /todos
        expect: { status: 201 }
        capture: { todoId: { body: id } }
      - action: request
        method: DELETE
        path: /todos/{{capture.todoId}}
      - action: request
        method: GET
        path: /todos
        expect: { status: 200 }
"#,
        );

        let result = runner(transport.clone())
            .run(&spec.scenarios[0], &session())
            .await
            .unwrap();

        assert!(!result.passed());
        assert_eq!(result.steps[0].failures.len(), 1);
        assert_eq!(result.steps[1].error.as_ref().unwrap().code, "MISSING_CAPTURE");
        assert!(result.steps[1].status.is_none());
        assert!(result.steps[2].passed());
        assert_eq!(transport.paths(), vec!["POST /todos", "GET /todos"]);
    }

    #[tokio::test]
    async fn test_for_each_deletes_every_captured_item() {
        let transport = Arc::new(
            Scripted::new()
                .on("GET", "/todos", 200, serde_json::json!({"todos": [{"id": 1}, {"id": 2}, {"id": 3}]}))
                .on("DELETE", "/todos/", 200, Value::Null),
        );
        let spec = suite(
            r#"
  - id: "58"
    name: delete all
    class: cumulative
    steps:
      - action: request
        method: GET
        path: /todos
        capture: { todos: { body: todos } }
      - action: for_each
        over: todos
        request: { method: DELETE, path: "/todos/{{item.id}}" }
        expect: { status: 200 }
"#,
        );

        let result = runner(transport.clone())
            .run(&spec.scenarios[0], &session())
            .await
            .unwrap();

        assert!(result.passed());
        assert_eq!(result.steps[1].iterations, Some(3));
        assert_eq!(
            transport.paths(),
            vec!["GET /todos", "DELETE /todos/1", "DELETE /todos/2", "DELETE /todos/3"]
        );
    }

    #[tokio::test]
    async fn test_repeat_stops_when_until_holds() {
        let transport = Arc::new(
            Scripted::new().on("POST", "/todos", 400, serde_json::json!({"errorMessages": ["ERROR: Cannot add instance, maximum limit of 20 reached"]})),
        );
        let spec = suite(
            r#"
  - id: "59"
    name: fill up
    class: cumulative
    steps:
      - action: repeat
        times: 30
        request: { method: POST, path: /todos, body: { title: "todo {{index}}" } }
        expect: { status: 201 }
        until: { status: 400 }
"#,
        );

        let result = runner(transport.clone())
            .run(&spec.scenarios[0], &session())
            .await
            .unwrap();

        assert!(result.passed(), "{:?}", result.first_failure);
        assert_eq!(result.steps[0].iterations, Some(1));
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].body.as_deref(), Some(&br#"{"title":"todo 0"}"#[..]));
    }

    #[tokio::test]
    async fn test_bind_mints_session_credential() {
        let transport = Arc::new(
            Scripted::new()
                .on("POST", "/secret/token", 201, Value::Null)
                .with_header("x-auth-token", "tok-1")
                .on("GET", "/secret/note", 200, serde_json::json!({"note": ""})),
        );
        let spec = suite(
            r#"
  - id: "53"
    name: auth then read note
    steps:
      - action: request
        method: POST
        path: /secret/token
        expect: { status: 201 }
        bind: { authToken: { header: x-auth-token } }
      - action: request
        method: GET
        path: /secret/note
        headers: { X-AUTH-TOKEN: "{{authToken}}" }
        expect:
          status: 200
          body: [{ path: note, is: string }]
"#,
        );
        let session = session();

        let result = runner(transport.clone())
            .run(&spec.scenarios[0], &session)
            .await
            .unwrap();

        assert!(result.passed(), "{:?}", result.first_failure);
        assert_eq!(session.get("authToken").await.unwrap(), "tok-1");
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[1].header("X-AUTH-TOKEN"), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = Arc::new(Scripted::new());
        let spec = suite(
            r#"
  - id: "02"
    name: list
    steps:
      - { action: request, method: GET, path: /todos }
"#,
        );

        let err = runner(transport)
            .run(&spec.scenarios[0], &session())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
