//! Wire Message Types
//!
//! One JSON object per line in each direction.
//!
//! ## Request
//!
//! ```text
//! {"id":"1","auth":"secret","command":"WRITE","data":{"key":"a","value":"aGk="}}
//! ```
//!
//! `data.value` carries the raw value bytes, base64 encoded.
//!
//! ## Response
//!
//! ```text
//! {"id":"1","success":true,"command":"WRITE","data":{...},"error":null,"timestamp":1700000000000}
//! ```
//!
//! `timestamp` is the server clock in milliseconds since the Unix epoch.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Id used when a request's own id is unknown.
pub const UNKNOWN_ID: &str = "unknown";

/// Command tag used when a request names no command.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN";

/// Command tag of replies to lines that are not valid requests.
pub const PARSE_COMMAND: &str = "PARSE";

/// A decoded request line.
///
/// Every field is optional on the wire; the command layer decides which ones
/// each command needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub id: Option<String>,
    pub auth: Option<String>,
    pub command: Option<String>,
    pub key: Option<String>,
    pub value: Option<Bytes>,
}

impl Request {
    /// Creates a request for `command` with the given id.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Serializes the request as one newline-terminated JSON line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut obj = Map::new();
        if let Some(id) = &self.id {
            obj.insert("id".into(), Value::from(id.as_str()));
        }
        if let Some(auth) = &self.auth {
            obj.insert("auth".into(), Value::from(auth.as_str()));
        }
        if let Some(command) = &self.command {
            obj.insert("command".into(), Value::from(command.as_str()));
        }

        let mut data = Map::new();
        if let Some(key) = &self.key {
            data.insert("key".into(), Value::from(key.as_str()));
        }
        if let Some(value) = &self.value {
            data.insert("value".into(), Value::from(STANDARD.encode(value)));
        }
        if !data.is_empty() {
            obj.insert("data".into(), Value::Object(data));
        }

        let mut line = Value::Object(obj).to_string().into_bytes();
        line.push(b'\n');
        line
    }
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    pub command: String,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: u64,
}

impl Response {
    pub fn success(id: impl Into<String>, command: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            command: command.into(),
            data: Some(data),
            error: None,
            timestamp: now_millis(),
        }
    }

    pub fn error(id: impl Into<String>, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            command: command.into(),
            data: None,
            error: Some(message.into()),
            timestamp: now_millis(),
        }
    }

    /// Serializes the response as one newline-terminated JSON line.
    pub fn to_line(&self) -> Vec<u8> {
        // A struct of strings, bools and JSON values always serializes
        let mut line = serde_json::to_vec(self).unwrap_or_else(|_| {
            json!({"id": self.id, "success": false, "command": self.command,
                   "data": null, "error": "Internal error", "timestamp": self.timestamp})
            .to_string()
            .into_bytes()
        });
        line.push(b'\n');
        line
    }

    /// Parses a response line, as a client would.
    pub fn from_line(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }

    /// `data.<field>` of a success response.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref()?.get(name)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
