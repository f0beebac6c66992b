//! Request Line Parser
//!
//! Turns one line of input into a [`Request`]. The parser is lenient about
//! what it does not use: unknown fields are ignored, a `data` member that is
//! not an object is ignored, and a JSON `null` counts as absent.
//!
//! Anything it cannot make sense of yields a [`ProtocolError`], which the
//! connection answers with a `PARSE` error envelope:
//!
//! ```text
//! {"id":"unknown","success":false,"command":"PARSE","data":null,
//!  "error":"Invalid message format: ...","timestamp":...}
//! ```

use crate::protocol::types::{Request, Response, PARSE_COMMAND, UNKNOWN_ID};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur while parsing a request line.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// A line exceeded the configured maximum before its newline arrived
    #[error("Invalid message format: line exceeds {max} bytes")]
    LineTooLong { max: usize },
}

impl ProtocolError {
    fn invalid(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidMessage(msg.into())
    }

    /// The `PARSE` error envelope for this error.
    pub fn to_response(&self) -> Response {
        Response::error(UNKNOWN_ID, PARSE_COMMAND, self.to_string())
    }
}

/// Parses one request line. A trailing `\r` (and `\n`) is tolerated.
pub fn parse_request(line: &[u8]) -> Result<Request, ProtocolError> {
    let line = trim_line_end(line);

    let value: Value =
        serde_json::from_slice(line).map_err(|e| ProtocolError::invalid(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(ProtocolError::invalid("expected a JSON object"));
    };

    let mut request = Request {
        id: text_field(&obj, "id")?,
        auth: text_field(&obj, "auth")?,
        command: text_field(&obj, "command")?,
        ..Default::default()
    };

    if let Some(Value::Object(data)) = obj.get("data") {
        request.key = text_field(data, "key")?;
        request.value = match text_field(data, "value")? {
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded.as_bytes())
                    .map(Bytes::from)
                    .map_err(|e| ProtocolError::invalid(format!("bad base64 value: {}", e)))?,
            ),
            None => None,
        };
    }

    Ok(request)
}

/// Reads a scalar member as text. Numbers and booleans are accepted in their
/// JSON spelling; arrays and objects are rejected.
fn text_field(obj: &Map<String, Value>, name: &str) -> Result<Option<String>, ProtocolError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
        Some(_) => Err(ProtocolError::invalid(format!(
            "field '{}' must be a string",
            name
        ))),
    }
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = line {
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_request() {
        let req = parse_request(
            br#"{"id":"1","auth":"t","command":"write","data":{"key":"a","value":"aGk="}}"#,
        )
        .unwrap();

        assert_eq!(req.id.as_deref(), Some("1"));
        assert_eq!(req.auth.as_deref(), Some("t"));
        assert_eq!(req.command.as_deref(), Some("write"));
        assert_eq!(req.key.as_deref(), Some("a"));
        assert_eq!(req.value, Some(Bytes::from("hi")));
    }

    #[test]
    fn test_parse_tolerates_crlf() {
        let req = parse_request(b"{\"id\":\"1\",\"command\":\"LIST\"}\r\n").unwrap();
        assert_eq!(req.command.as_deref(), Some("LIST"));
    }

    #[test]
    fn test_missing_fields_are_none() {
        let req = parse_request(br#"{"command":"STATS"}"#).unwrap();
        assert_eq!(req.id, None);
        assert_eq!(req.auth, None);
        assert_eq!(req.key, None);
        assert_eq!(req.value, None);
    }

    #[test]
    fn test_non_object_data_ignored() {
        let req = parse_request(br#"{"id":"1","command":"READ","data":"a"}"#).unwrap();
        assert_eq!(req.key, None);
    }

    #[test]
    fn test_numeric_id_accepted() {
        let req = parse_request(br#"{"id":42,"command":"LIST"}"#).unwrap();
        assert_eq!(req.id.as_deref(), Some("42"));
    }

    #[test]
    fn test_empty_value_decodes() {
        let req = parse_request(br#"{"id":"1","data":{"key":"k","value":""}}"#).unwrap();
        assert_eq!(req.value, Some(Bytes::new()));
    }

    #[test]
    fn test_invalid_lines() {
        for line in [
            &b"not json"[..],
            &b"[1,2]"[..],
            &br#"{"id":["x"]}"#[..],
            &br#"{"id":"1","data":{"key":"a","value":"***"}}"#[..],
        ] {
            let err = parse_request(line).unwrap_err();
            assert!(err.to_string().starts_with("Invalid message format: "));
        }
    }

    #[test]
    fn test_parse_error_envelope() {
        let resp = parse_request(b"{").unwrap_err().to_response();
        assert_eq!(resp.id, "unknown");
        assert_eq!(resp.command, "PARSE");
        assert!(!resp.success);
        assert!(resp
            .error
            .as_deref()
            .unwrap()
            .starts_with("Invalid message format: "));
    }
}
