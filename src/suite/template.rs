//! `{{...}}` placeholders in paths, headers, bodies and expected values
//!
//! | Syntax | Resolves to |
//! |---|---|
//! | `{{challengeToken}}` | session credential |
//! | `{{capture.todoId}}`, `{{capture.db.todos.0}}` | value captured earlier in the scenario |
//! | `{{item}}`, `{{item.id}}` | current element of a `for_each` step |
//! | `{{index}}` | zero-based iteration of a `for_each`/`repeat` step |
//! | `{{repeat:a:51}}` | the text `a` repeated 51 times |
//!
//! Templates are resolved at execution time, never at load time. A body string
//! made of a single placeholder is replaced by the raw value, so a captured
//! object can be sent back as-is.

use std::collections::HashMap;

use serde_json::Value;

use super::path::{lookup, to_text};
use crate::common::{Error, Result};

/// A parsed placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Session(String),
    Capture { name: String, path: String },
    Item(String),
    Index,
    Repeat { text: String, count: usize },
}

#[derive(Debug)]
enum Segment<'t> {
    Literal(&'t str),
    Placeholder(Placeholder),
}

/// Values visible to a template while a step executes
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub session: &'a HashMap<String, String>,
    pub captures: &'a HashMap<String, Value>,
    pub item: Option<&'a Value>,
    pub index: Option<usize>,
}

impl<'a> Scope<'a> {
    pub fn new(session: &'a HashMap<String, String>, captures: &'a HashMap<String, Value>) -> Self {
        Self {
            session,
            captures,
            item: None,
            index: None,
        }
    }

    /// Same scope, positioned on one iteration of a bulk step
    pub fn iteration(self, index: usize, item: Option<&'a Value>) -> Self {
        Self {
            index: Some(index),
            item,
            ..self
        }
    }

    fn resolve(&self, placeholder: &Placeholder) -> Result<Value> {
        match placeholder {
            Placeholder::Session(key) => self
                .session
                .get(key)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| Error::missing_binding(key)),
            Placeholder::Capture { name, path } => {
                let captured = self
                    .captures
                    .get(name)
                    .ok_or_else(|| Error::missing_capture(name))?;
                lookup(captured, path)
                    .cloned()
                    .ok_or_else(|| Error::missing_capture(&format!("{}.{}", name, path)))
            }
            Placeholder::Item(path) => {
                let item = self.item.ok_or_else(|| {
                    Error::Definition("{{item}} used outside of a for_each step".to_string())
                })?;
                lookup(item, path)
                    .cloned()
                    .ok_or_else(|| Error::missing_capture(&format!("item.{}", path)))
            }
            Placeholder::Index => self.index.map(Value::from).ok_or_else(|| {
                Error::Definition("{{index}} used outside of a bulk step".to_string())
            }),
            Placeholder::Repeat { text, count } => Ok(Value::String(text.repeat(*count))),
        }
    }
}

fn parse(text: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            Error::Definition(format!("unterminated placeholder in '{}'", text))
        })?;
        segments.push(Segment::Placeholder(parse_placeholder(after[..end].trim(), text)?));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }

    Ok(segments)
}

fn parse_placeholder(expr: &str, text: &str) -> Result<Placeholder> {
    let invalid = || Error::Definition(format!("invalid placeholder '{{{{{}}}}}' in '{}'", expr, text));

    if let Some(spec) = expr.strip_prefix("repeat:") {
        let (repeated, count) = spec.rsplit_once(':').ok_or_else(invalid)?;
        let count = count.trim().parse().map_err(|_| invalid())?;
        return Ok(Placeholder::Repeat {
            text: repeated.to_string(),
            count,
        });
    }
    if expr == "index" {
        return Ok(Placeholder::Index);
    }
    if expr == "item" {
        return Ok(Placeholder::Item(String::new()));
    }
    if let Some(path) = expr.strip_prefix("item.") {
        return Ok(Placeholder::Item(path.to_string()));
    }
    if let Some(rest) = expr.strip_prefix("capture.") {
        let (name, path) = rest.split_once('.').unwrap_or((rest, ""));
        if !is_identifier(name) {
            return Err(invalid());
        }
        return Ok(Placeholder::Capture {
            name: name.to_string(),
            path: path.to_string(),
        });
    }
    if is_identifier(expr) {
        return Ok(Placeholder::Session(expr.to_string()));
    }
    Err(invalid())
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// All placeholders in a text template
pub fn placeholders(text: &str) -> Result<Vec<Placeholder>> {
    Ok(parse(text)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// All placeholders in the string leaves of a structured template
pub fn value_placeholders(value: &Value) -> Result<Vec<Placeholder>> {
    let mut found = Vec::new();
    collect(value, &mut found)?;
    Ok(found)
}

fn collect(value: &Value, found: &mut Vec<Placeholder>) -> Result<()> {
    match value {
        Value::String(s) => found.extend(placeholders(s)?),
        Value::Array(items) => {
            for item in items {
                collect(item, found)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect(item, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolve a text template
pub fn render(text: &str, scope: &Scope<'_>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for segment in parse(text)? {
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Placeholder(p) => out.push_str(&to_text(&scope.resolve(&p)?)),
        }
    }
    Ok(out)
}

/// Resolve every string leaf of a structured template
pub fn render_value(value: &Value, scope: &Scope<'_>) -> Result<Value> {
    match value {
        Value::String(s) => {
            let mut segments = parse(s)?;
            if let [Segment::Placeholder(_)] = segments.as_slice() {
                if let Some(Segment::Placeholder(p)) = segments.pop() {
                    return scope.resolve(&p);
                }
            }
            render(s, scope).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, scope)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}
