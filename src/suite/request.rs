//! Turning request templates into wire requests, and wire responses back into values

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use super::config::{BodyFormat, RequestTemplate};
use super::path;
use super::template::{render, render_value, Scope};
use crate::codec::{self, CodecError, ContentType};
use crate::common::{join_url, Error, Result};
use crate::http::{HttpRequest, RawResponse};

/// Resolve every template in `template` and encode its body
///
/// `default_headers` are applied first; a step header with the same name
/// (case-insensitive) replaces the default.
pub fn build_request(
    template: &RequestTemplate,
    base_url: &str,
    default_headers: &BTreeMap<String, String>,
    scope: &Scope<'_>,
    timeout: Duration,
) -> Result<HttpRequest> {
    let path = render(&template.path, scope)?;

    let mut headers: Vec<(String, String)> = Vec::new();
    for (name, value) in default_headers.iter().chain(template.headers.iter()) {
        let value = render(value, scope)?;
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value));
    }

    let body = match &template.body {
        Some(body) => {
            let mut value = render_value(body, scope)?;
            for (at, patch) in &template.patch {
                if !path::set(&mut value, at, render_value(patch, scope)?) {
                    return Err(Error::Definition(format!(
                        "cannot patch '{}': no such location in the request body",
                        at
                    )));
                }
            }
            Some(encode_body(&value, template.format, &mut headers)?)
        }
        None => None,
    };

    Ok(HttpRequest {
        method: template.method.to_ascii_uppercase(),
        url: join_url(base_url, &path),
        headers,
        body,
        timeout,
    })
}

/// Encode a rendered body
///
/// The explicit `format` wins, then the declared `Content-Type`. A string
/// body is sent verbatim unless JSON is requested explicitly, so that
/// deliberately malformed or foreign payloads reach the server untouched.
/// A structured body with an unsupported `Content-Type` is sent as JSON.
fn encode_body(
    value: &Value,
    format: Option<BodyFormat>,
    headers: &mut Vec<(String, String)>,
) -> Result<Vec<u8>> {
    let declared = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| ContentType::parse(v));

    let content_type = match (format, value) {
        (Some(BodyFormat::Raw), _) | (None, Value::String(_)) => return Ok(raw_bytes(value)),
        (Some(BodyFormat::Json), _) => ContentType::Json,
        (Some(BodyFormat::Xml), _) => ContentType::Xml,
        (None, _) => match declared.clone() {
            Some(ContentType::Other(_)) => {
                return Ok(codec::encode(value, &ContentType::Json)?);
            }
            Some(declared) => declared,
            None => ContentType::Json,
        },
    };

    if declared.is_none() {
        headers.push(("Content-Type".to_string(), content_type.mime().to_string()));
    }
    Ok(codec::encode(value, &content_type)?)
}

fn raw_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

/// Decode a response body by its declared content type
///
/// Returns `None` for an empty body. A body without a `Content-Type` is
/// tried as JSON.
pub fn decode_body(response: &RawResponse) -> Option<std::result::Result<Value, CodecError>> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let content_type = response.content_type().unwrap_or(ContentType::Json);
    Some(codec::decode(&response.body, &content_type))
}
