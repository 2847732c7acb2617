//! Assertion engine
//!
//! Compares the facets of one response (status, headers, decoded body, error
//! list) against an [`Expectation`]. Every mismatch is collected; nothing
//! short-circuits, so one run shows all divergences of a step. Checking is
//! pure: the same expectation, response and scope always give the same list.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::config::{BodyAssertion, Expectation, HeaderAssertion, ValueKind};
use super::path::{lookup, to_text};
use super::template::{render, render_value, Scope};
use crate::common::config::{ErrorMatch, RunnerConfig};
use crate::http::RawResponse;

/// Which part of the response a failure is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Status,
    Header,
    Body,
    ErrorMessages,
    /// A `repeat` step whose `until` condition never held
    Until,
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Facet::Status => "status",
            Facet::Header => "header",
            Facet::Body => "body",
            Facet::ErrorMessages => "error messages",
            Facet::Until => "until",
        })
    }
}

/// One expected-vs-actual mismatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionFailure {
    pub facet: Facet,
    /// Header name, body path or error path; empty for status
    pub target: String,
    pub expected: String,
    pub actual: String,
    /// Set for best-effort checks; reported as a warning
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub advisory: bool,
    /// Iteration of a bulk step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
}

impl AssertionFailure {
    fn new(facet: Facet, target: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            facet,
            target: target.into(),
            expected: expected.into(),
            actual: actual.into(),
            advisory: false,
            iteration: None,
        }
    }

    pub fn at_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub(crate) fn until_unmet(times: usize) -> Self {
        Self::new(
            Facet::Until,
            "",
            "until condition to hold",
            format!("not met after {} iterations", times),
        )
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(i) = self.iteration {
            write!(f, "[#{}] ", i)?;
        }
        write!(f, "{}", self.facet)?;
        if !self.target.is_empty() {
            write!(f, " '{}'", self.target)?;
        }
        write!(f, ": expected {}, got {}", self.expected, self.actual)
    }
}

/// The response facets assertions look at
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    /// Lower-cased header names
    pub headers: &'a BTreeMap<String, String>,
    /// Decoded canonical body, if the response had a decodable one
    pub body: Option<&'a Value>,
}

impl<'a> ResponseView<'a> {
    pub fn new(response: &'a RawResponse, body: Option<&'a Value>) -> Self {
        Self {
            status: response.status,
            headers: &response.headers,
            body,
        }
    }

    fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Checks expectations against responses
#[derive(Debug, Clone)]
pub struct AssertionEngine {
    error_path: String,
    error_match: ErrorMatch,
}

impl Default for AssertionEngine {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl AssertionEngine {
    pub fn new(error_path: impl Into<String>, error_match: ErrorMatch) -> Self {
        Self {
            error_path: error_path.into(),
            error_match,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.error_path.clone(), config.error_match)
    }

    /// Every mismatch between `expected` and `actual`; empty means the step passed
    pub fn check(
        &self,
        expected: &Expectation,
        actual: &ResponseView<'_>,
        scope: &Scope<'_>,
    ) -> Vec<AssertionFailure> {
        let mut failures = Vec::new();

        if let Some(status) = expected.status {
            if status != actual.status {
                failures.push(AssertionFailure::new(
                    Facet::Status,
                    "",
                    status.to_string(),
                    actual.status.to_string(),
                ));
            }
        }

        for assertion in &expected.headers {
            check_header(assertion, actual, scope, &mut failures);
        }

        for assertion in &expected.body {
            check_body(assertion, actual.body, scope, &mut failures);
        }

        if !expected.errors_contain.is_empty() {
            self.check_errors(&expected.errors_contain, actual.body, &mut failures);
        }

        failures
    }

    fn check_errors(&self, messages: &[String], body: Option<&Value>, failures: &mut Vec<AssertionFailure>) {
        let list = body.and_then(|b| lookup(b, &self.error_path));
        let Some(Value::Array(items)) = list else {
            let actual = match list {
                Some(other) => format!("{} instead of a list", ValueKind::of(other).as_str()),
                None => "no error list".to_string(),
            };
            for message in messages {
                failures.push(AssertionFailure::new(
                    Facet::ErrorMessages,
                    &self.error_path,
                    format!("{:?}", message),
                    actual.clone(),
                ));
            }
            return;
        };

        let texts: Vec<String> = items.iter().map(to_text).collect();
        for message in messages {
            let found = texts.iter().any(|t| match self.error_match {
                ErrorMatch::Exact => t == message,
                ErrorMatch::Substring => t.contains(message.as_str()),
            });
            if !found {
                failures.push(AssertionFailure::new(
                    Facet::ErrorMessages,
                    &self.error_path,
                    format!("{:?}", message),
                    format!("{:?}", texts),
                ));
            }
        }
    }
}

fn check_header(
    assertion: &HeaderAssertion,
    actual: &ResponseView<'_>,
    scope: &Scope<'_>,
    failures: &mut Vec<AssertionFailure>,
) {
    let value = actual.header(&assertion.name);
    let shown = || value.map_or_else(|| "no header".to_string(), |v| format!("{:?}", v));
    let mut push = |expected: String, got: String| {
        let mut failure = AssertionFailure::new(Facet::Header, &assertion.name, expected, got);
        failure.advisory = assertion.best_effort;
        failures.push(failure);
    };

    if let Some(present) = assertion.present {
        if present != value.is_some() {
            let expected = if present { "present" } else { "absent" };
            push(expected.to_string(), shown());
        }
    }

    if let Some(template) = &assertion.equals {
        match render(template, scope) {
            Ok(want) if value == Some(want.as_str()) => {}
            Ok(want) => push(format!("{:?}", want), shown()),
            Err(e) => push(template.clone(), format!("unresolvable expectation ({})", e)),
        }
    }

    if let Some(template) = &assertion.contains {
        match render(template, scope) {
            Ok(want) if value.is_some_and(|v| v.contains(want.as_str())) => {}
            Ok(want) => push(format!("value containing {:?}", want), shown()),
            Err(e) => push(template.clone(), format!("unresolvable expectation ({})", e)),
        }
    }
}

fn check_body(
    assertion: &BodyAssertion,
    body: Option<&Value>,
    scope: &Scope<'_>,
    failures: &mut Vec<AssertionFailure>,
) {
    let Some(body) = body else {
        if assertion.exists != Some(false) {
            failures.push(AssertionFailure::new(
                Facet::Body,
                &assertion.path,
                "a decoded body",
                "no decodable body",
            ));
        }
        return;
    };

    let value = lookup(body, &assertion.path);

    let Some(sub_path) = &assertion.each else {
        check_value(assertion, &assertion.path, value, scope, failures);
        return;
    };

    match value {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let target = if sub_path.is_empty() {
                    format!("{}.{}", assertion.path, i)
                } else {
                    format!("{}.{}.{}", assertion.path, i, sub_path)
                };
                check_value(assertion, &target, lookup(item, sub_path), scope, failures);
            }
        }
        other => failures.push(AssertionFailure::new(
            Facet::Body,
            &assertion.path,
            "an array",
            describe(other),
        )),
    }
}

fn check_value(
    assertion: &BodyAssertion,
    target: &str,
    value: Option<&Value>,
    scope: &Scope<'_>,
    failures: &mut Vec<AssertionFailure>,
) {
    let mut push = |expected: String, actual: String| {
        failures.push(AssertionFailure::new(Facet::Body, target, expected, actual));
    };

    let Some(value) = value else {
        if assertion.exists == Some(true) || assertion.inspects_value() {
            push("present".to_string(), "missing".to_string());
        }
        return;
    };

    if assertion.exists == Some(false) {
        push("absent".to_string(), value.to_string());
    }

    if let Some(template) = &assertion.equals {
        match render_value(template, scope) {
            Ok(want) if &want == value => {}
            Ok(want) => push(want.to_string(), value.to_string()),
            Err(e) => push(template.to_string(), format!("unresolvable expectation ({})", e)),
        }
    }

    if let Some(kind) = assertion.kind {
        let actual = ValueKind::of(value);
        if actual != kind {
            push(format!("any {}", kind.as_str()), format!("{} {}", actual.as_str(), value));
        }
    }

    if let Some(pattern) = &assertion.matches {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&to_text(value)) => {}
            Ok(_) => push(format!("match for /{}/", pattern), value.to_string()),
            Err(e) => push(format!("match for /{}/", pattern), format!("invalid regex ({})", e)),
        }
    }

    if let Some(length) = assertion.length {
        let actual = match value {
            Value::Array(items) => Some(items.len()),
            Value::String(s) => Some(s.chars().count()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        };
        match actual {
            Some(n) if n == length => {}
            Some(n) => push(format!("length {}", length), format!("length {}", n)),
            None => push(
                format!("length {}", length),
                format!("{} without a length", ValueKind::of(value).as_str()),
            ),
        }
    }

    if let Some(template) = &assertion.contains {
        let want = match render_value(template, scope) {
            Ok(want) => want,
            Err(e) => {
                push(template.to_string(), format!("unresolvable expectation ({})", e));
                return;
            }
        };
        let found = match (value, &want) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), want) => items.contains(want),
            _ => false,
        };
        if !found {
            push(format!("value containing {}", want), value.to_string());
        }
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        Some(v) => format!("{} {}", ValueKind::of(v).as_str(), v),
        None => "missing".to_string(),
    }
}
