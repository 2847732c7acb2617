//! Content codec
//!
//! Request and response bodies are converted to and from one canonical
//! in-memory form (`serde_json::Value`) so that body assertions apply the same
//! way whether the wire format was JSON or XML.

mod xml;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding a body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed {content_type} body at offset {offset}: {reason}")]
    Malformed {
        content_type: String,
        offset: u64,
        reason: String,
    },

    #[error("Unsupported content type '{0}'")]
    Unsupported(String),

    #[error("Cannot encode value as {content_type}: {reason}")]
    Encode {
        content_type: String,
        reason: String,
    },
}

impl CodecError {
    fn malformed(content_type: &ContentType, offset: u64, reason: impl ToString) -> Self {
        Self::Malformed {
            content_type: content_type.to_string(),
            offset,
            reason: reason.to_string(),
        }
    }
}

/// Media type of a body, as far as the codec cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
    /// Anything else, lowercased without parameters
    Other(String),
}

impl ContentType {
    /// Parse a `Content-Type` header value, ignoring parameters such as charset
    pub fn parse(header: &str) -> Self {
        let media = header
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match media.as_str() {
            "application/json" | "text/json" => ContentType::Json,
            "application/xml" | "text/xml" => ContentType::Xml,
            m if m.ends_with("+json") => ContentType::Json,
            m if m.ends_with("+xml") => ContentType::Xml,
            _ => ContentType::Other(media),
        }
    }

    /// The header value to send for this content type
    pub fn mime(&self) -> &str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            ContentType::Other(m) => m,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Encode a canonical value for the wire
///
/// Fields unknown to the wire schema are passed through untouched; validating
/// them is the remote service's job.
pub fn encode(value: &Value, content_type: &ContentType) -> Result<Vec<u8>, CodecError> {
    match content_type {
        ContentType::Json => serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            content_type: content_type.to_string(),
            reason: e.to_string(),
        }),
        ContentType::Xml => xml::encode(value),
        ContentType::Other(m) => Err(CodecError::Unsupported(m.clone())),
    }
}

/// Decode a wire body into its canonical value
pub fn decode(bytes: &[u8], content_type: &ContentType) -> Result<Value, CodecError> {
    match content_type {
        ContentType::Json => serde_json::from_slice(bytes).map_err(|e| {
            let offset = offset_of(bytes, e.line(), e.column());
            CodecError::malformed(content_type, offset, e)
        }),
        ContentType::Xml => xml::decode(bytes),
        ContentType::Other(m) => Err(CodecError::Unsupported(m.clone())),
    }
}

/// Convert serde_json's 1-based line/column into a byte offset
fn offset_of(bytes: &[u8], line: usize, column: usize) -> u64 {
    let line_start: usize = bytes
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    (line_start + column.saturating_sub(1)).min(bytes.len()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_content_type() {
        assert_eq!(ContentType::parse("application/json"), ContentType::Json);
        assert_eq!(
            ContentType::parse("application/json; charset=utf-8"),
            ContentType::Json
        );
        assert_eq!(ContentType::parse("Application/XML"), ContentType::Xml);
        assert_eq!(ContentType::parse("application/problem+json"), ContentType::Json);
        assert_eq!(
            ContentType::parse("test"),
            ContentType::Other("test".to_string())
        );
    }

    #[test]
    fn test_json_passes_unknown_fields_through() {
        let value = json!({"title": "a", "doneStatus": true, "priority": 1});
        let bytes = encode(&value, &ContentType::Json).unwrap();
        assert_eq!(decode(&bytes, &ContentType::Json).unwrap(), value);
    }

    #[test]
    fn test_malformed_json_reports_offset() {
        let err = decode(b"{\"title\": }", &ContentType::Json).unwrap_err();
        match err {
            CodecError::Malformed {
                content_type,
                offset,
                ..
            } => {
                assert_eq!(content_type, "application/json");
                assert_eq!(offset, 10);
            }
            other => panic!("Expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = encode(&json!({}), &ContentType::parse("test")).unwrap_err();
        assert_eq!(err, CodecError::Unsupported("test".to_string()));
        assert!(decode(b"x", &ContentType::parse("text/plain")).is_err());
    }
}
