//! Suite definition types
//!
//! Defines the data structures for deserializing YAML suite tables, plus the
//! definition checks that run before any request is sent.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::path::lookup;
use super::template::{placeholders, value_placeholders, Placeholder};
use crate::common::{Error, Result};
use crate::http::{RawResponse, SUPPORTED_METHODS};

/// A complete suite loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct SuiteSpec {
    /// Name of the suite
    pub name: String,
    /// Optional description of what the suite covers
    pub description: Option<String>,
    /// Base URL of the service under test (overridden by `--base-url`)
    pub base_url: Option<String>,
    /// Request that seeds the session credentials, run once per suite
    pub bootstrap: BootstrapSpec,
    /// Header templates added to every scenario request
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Scenarios in their supported execution order
    pub scenarios: Vec<ScenarioSpec>,
}

/// Session bootstrap: one request whose response mints the credentials
#[derive(Deserialize, Debug, Clone)]
pub struct BootstrapSpec {
    #[serde(flatten)]
    pub request: RequestTemplate,
    #[serde(default)]
    pub expect: Expectation,
    /// Session keys to seed, and where to read them from
    pub bind: BTreeMap<String, ValueSource>,
}

/// One logical test case
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioSpec {
    /// Short stable identifier (used by `--only`)
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub class: ScenarioClass,
    pub steps: Vec<StepSpec>,
}

/// Scheduling class of a scenario
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioClass {
    /// No assumptions about the remote entity count
    #[default]
    Independent,
    /// Assumes a starting entity count; always run serially, after the rest
    Cumulative,
}

/// A single step in the execution flow
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepSpec {
    /// One request/response exchange
    Request(RequestStep),
    /// One request per element of a captured array
    ForEach(ForEachStep),
    /// The same request issued repeatedly
    Repeat(RepeatStep),
}

#[derive(Deserialize, Debug, Clone)]
pub struct RequestStep {
    pub name: Option<String>,
    #[serde(flatten)]
    pub request: RequestTemplate,
    #[serde(default)]
    pub expect: Expectation,
    /// Scenario-scoped values extracted from the response
    #[serde(default)]
    pub capture: BTreeMap<String, ValueSource>,
    /// Session credentials minted by this response
    #[serde(default)]
    pub bind: BTreeMap<String, ValueSource>,
    /// Allow `bind` to overwrite an already bound credential
    #[serde(default)]
    pub rebind: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ForEachStep {
    pub name: Option<String>,
    /// Name of a capture holding an array
    pub over: String,
    pub request: RequestTemplate,
    /// Checked for every iteration
    #[serde(default)]
    pub expect: Expectation,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RepeatStep {
    pub name: Option<String>,
    /// Upper bound on iterations
    pub times: usize,
    pub request: RequestTemplate,
    /// Checked for every iteration that does not satisfy `until`
    #[serde(default)]
    pub expect: Expectation,
    /// Stop as soon as a response satisfies this
    pub until: Option<Expectation>,
}

/// Request half of a step; every string is a template
#[derive(Deserialize, Debug, Clone)]
pub struct RequestTemplate {
    pub method: String,
    /// Path relative to the base URL, may carry a query string
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Structured body, or a string sent verbatim
    pub body: Option<Value>,
    /// Body encoding; inferred from `Content-Type` when absent
    pub format: Option<BodyFormat>,
    /// Values set at dotted paths of the rendered body before it is encoded
    #[serde(default)]
    pub patch: BTreeMap<String, Value>,
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    Json,
    Xml,
    /// Send the (string) body as-is
    Raw,
}

/// Where a captured or bound value comes from
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// A response header
    Header(String),
    /// A path into the decoded body (`""` for the whole body)
    Body(String),
}

impl ValueSource {
    /// Pull the value out of a response
    pub fn extract(&self, response: &RawResponse, body: Option<&Value>) -> Option<Value> {
        match self {
            ValueSource::Header(name) => response.header(name).map(|v| Value::String(v.to_string())),
            ValueSource::Body(path) => body.and_then(|b| lookup(b, path)).cloned(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ValueSource::Header(name) => format!("header '{}'", name),
            ValueSource::Body(path) if path.is_empty() => "body".to_string(),
            ValueSource::Body(path) => format!("body field '{}'", path),
        }
    }
}

/// Expected facets of a response
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Expectation {
    /// Exact status code
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: Vec<HeaderAssertion>,
    #[serde(default)]
    pub body: Vec<BodyAssertion>,
    /// Literal messages that must appear in the error list
    #[serde(default)]
    pub errors_contain: Vec<String>,
}

impl Expectation {
    /// Whether checking this expectation requires a decoded body
    pub fn needs_body(&self) -> bool {
        !self.body.is_empty() || !self.errors_contain.is_empty()
    }
}

/// Assertion for a response header
#[derive(Deserialize, Debug, Clone, Default)]
pub struct HeaderAssertion {
    /// Header name (case-insensitive)
    pub name: String,
    /// Expected exact value (template)
    pub equals: Option<String>,
    /// Expected value substring (template)
    pub contains: Option<String>,
    /// Whether the header must be present (or absent)
    pub present: Option<bool>,
    /// Report a mismatch as a warning instead of a failure
    #[serde(default)]
    pub best_effort: bool,
}

/// Assertion for a field of the decoded body
#[derive(Deserialize, Debug, Clone, Default)]
pub struct BodyAssertion {
    /// Dotted path; empty for the whole body
    #[serde(default)]
    pub path: String,
    /// Apply the predicates to every element of the array at `path`,
    /// at this sub-path of each element
    pub each: Option<String>,
    pub exists: Option<bool>,
    pub equals: Option<Value>,
    #[serde(rename = "is")]
    pub kind: Option<ValueKind>,
    /// Regex matched against the value's text
    pub matches: Option<String>,
    /// Array length, string length in chars, or object size
    pub length: Option<usize>,
    /// Substring of a string, or element of an array
    pub contains: Option<Value>,
}

impl BodyAssertion {
    /// Whether any predicate needs the value to exist
    pub fn inspects_value(&self) -> bool {
        self.equals.is_some()
            || self.kind.is_some()
            || self.matches.is_some()
            || self.length.is_some()
            || self.contains.is_some()
    }
}

/// JSON value categories for `is:` checks
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Boolean,
    Number,
    Array,
    Object,
    Null,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueKind::String,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Null => "null",
        }
    }
}

impl StepSpec {
    pub fn name(&self) -> Option<&str> {
        match self {
            StepSpec::Request(s) => s.name.as_deref(),
            StepSpec::ForEach(s) => s.name.as_deref(),
            StepSpec::Repeat(s) => s.name.as_deref(),
        }
    }

    pub fn request(&self) -> &RequestTemplate {
        match self {
            StepSpec::Request(s) => &s.request,
            StepSpec::ForEach(s) => &s.request,
            StepSpec::Repeat(s) => &s.request,
        }
    }

    /// Human label: the step name, or `METHOD path`
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("{} {}", self.request().method, self.request().path),
        }
    }

    fn expectations(&self) -> Vec<&Expectation> {
        match self {
            StepSpec::Request(s) => vec![&s.expect],
            StepSpec::ForEach(s) => vec![&s.expect],
            StepSpec::Repeat(s) => s.until.iter().chain(std::iter::once(&s.expect)).collect(),
        }
    }
}

impl ScenarioSpec {
    /// Whether any step mints session credentials
    pub fn writes_session(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, StepSpec::Request(r) if !r.bind.is_empty()))
    }
}

impl SuiteSpec {
    /// Load and parse a suite file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a suite; value sources are written as maps (`{ header: x-challenger }`)
    pub fn from_yaml(content: &str) -> Result<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(content);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer)
            .map_err(|e| Error::Config(format!("Failed to parse suite: {}", e)))
    }

    pub fn step_count(&self) -> usize {
        self.scenarios.iter().map(|s| s.steps.len()).sum()
    }

    /// Check every definition-time invariant, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let bootstrap_keys: HashSet<&str> = self.bootstrap.bind.keys().map(String::as_str).collect();
        if bootstrap_keys.is_empty() {
            problems.push("bootstrap binds no session keys".to_string());
        }

        let mut bootstrap_refs = Vec::new();
        collect_request_refs(&self.bootstrap.request, &mut bootstrap_refs, &mut problems, "bootstrap");
        for p in bootstrap_refs.into_iter().filter(|p| !matches!(p, Placeholder::Repeat { .. })) {
            problems.push(format!("bootstrap: placeholder {:?} cannot be resolved before the session exists", p));
        }
        check_request_shape(&self.bootstrap.request, "bootstrap", &mut problems);

        for (name, value) in &self.default_headers {
            let context = format!("default header '{}'", name);
            match placeholders(value) {
                Ok(found) => {
                    for p in found {
                        match &p {
                            Placeholder::Session(key) if bootstrap_keys.contains(key.as_str()) => {}
                            Placeholder::Repeat { .. } => {}
                            _ => problems.push(format!(
                                "{}: placeholder {:?} is not a bootstrap session key",
                                context, p
                            )),
                        }
                    }
                }
                Err(e) => problems.push(format!("{}: {}", context, e)),
            }
        }

        let mut ids = HashSet::new();
        for scenario in &self.scenarios {
            if !ids.insert(scenario.id.as_str()) {
                problems.push(format!("duplicate scenario id '{}'", scenario.id));
            }
            validate_scenario(scenario, &bootstrap_keys, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Definition(problems.join("; ")))
        }
    }
}

fn validate_scenario(scenario: &ScenarioSpec, bootstrap_keys: &HashSet<&str>, problems: &mut Vec<String>) {
    if scenario.steps.is_empty() {
        problems.push(format!("scenario '{}' has no steps", scenario.id));
    }

    let mut session: HashSet<String> = bootstrap_keys.iter().map(|k| k.to_string()).collect();
    let mut captures: HashSet<String> = HashSet::new();

    for (i, step) in scenario.steps.iter().enumerate() {
        let context = format!("scenario '{}' step {}", scenario.id, i + 1);
        check_request_shape(step.request(), &context, problems);

        let mut refs = Vec::new();
        collect_request_refs(step.request(), &mut refs, problems, &context);
        for expectation in step.expectations() {
            collect_expectation_refs(expectation, &mut refs, problems, &context);
        }

        let (in_for_each, in_bulk) = match step {
            StepSpec::Request(_) => (false, false),
            StepSpec::ForEach(_) => (true, true),
            StepSpec::Repeat(_) => (false, true),
        };

        for p in &refs {
            match p {
                Placeholder::Session(key) if !session.contains(key) => problems.push(format!(
                    "{}: session key '{}' is not bound at this point",
                    context, key
                )),
                Placeholder::Capture { name, .. } if !captures.contains(name) => problems.push(format!(
                    "{}: capture '{}' is not produced by an earlier step",
                    context, name
                )),
                Placeholder::Item(_) if !in_for_each => {
                    problems.push(format!("{}: {{{{item}}}} used outside of a for_each step", context))
                }
                Placeholder::Index if !in_bulk => {
                    problems.push(format!("{}: {{{{index}}}} used outside of a bulk step", context))
                }
                _ => {}
            }
        }

        match step {
            StepSpec::Request(s) => {
                captures.extend(s.capture.keys().cloned());
                session.extend(s.bind.keys().cloned());
            }
            StepSpec::ForEach(s) => {
                if !captures.contains(&s.over) {
                    problems.push(format!(
                        "{}: for_each over '{}' which is not produced by an earlier step",
                        context, s.over
                    ));
                }
            }
            StepSpec::Repeat(s) => {
                if s.times == 0 {
                    problems.push(format!("{}: repeat needs times >= 1", context));
                }
            }
        }
    }
}

fn check_request_shape(request: &RequestTemplate, context: &str, problems: &mut Vec<String>) {
    if !SUPPORTED_METHODS.contains(&request.method.to_ascii_uppercase().as_str()) {
        problems.push(format!("{}: unsupported method '{}'", context, request.method));
    }
    if request.format == Some(BodyFormat::Raw) && !matches!(request.body, None | Some(Value::String(_))) {
        problems.push(format!("{}: raw body must be a string", context));
    }
    if !request.patch.is_empty() && request.body.is_none() {
        problems.push(format!("{}: patch without a body", context));
    }
}

fn collect_request_refs(
    request: &RequestTemplate,
    refs: &mut Vec<Placeholder>,
    problems: &mut Vec<String>,
    context: &str,
) {
    let mut push = |found: Result<Vec<Placeholder>>| match found {
        Ok(found) => refs.extend(found),
        Err(e) => problems.push(format!("{}: {}", context, e)),
    };

    push(placeholders(&request.path));
    for value in request.headers.values() {
        push(placeholders(value));
    }
    if let Some(body) = &request.body {
        push(value_placeholders(body));
    }
    for value in request.patch.values() {
        push(value_placeholders(value));
    }
}

fn collect_expectation_refs(
    expectation: &Expectation,
    refs: &mut Vec<Placeholder>,
    problems: &mut Vec<String>,
    context: &str,
) {
    for header in &expectation.headers {
        for value in header.equals.iter().chain(header.contains.iter()) {
            match placeholders(value) {
                Ok(found) => refs.extend(found),
                Err(e) => problems.push(format!("{}: {}", context, e)),
            }
        }
    }
    for assertion in &expectation.body {
        for value in assertion.equals.iter().chain(assertion.contains.iter()) {
            match value_placeholders(value) {
                Ok(found) => refs.extend(found),
                Err(e) => problems.push(format!("{}: {}", context, e)),
            }
        }
        if let Some(pattern) = &assertion.matches {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!("{}: invalid regex '{}': {}", context, pattern, e));
            }
        }
    }
}
