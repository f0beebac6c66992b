//! Line-Delimited JSON Protocol
//!
//! Clients and server exchange one JSON object per `\n`-terminated line.
//!
//! ## Modules
//!
//! - `types`: `Request` and the `Response` envelope
//! - `parser`: request line parsing
//!
//! ## Example
//!
//! ```
//! use gridkv::protocol::{parse_request, Request, Response};
//! use serde_json::json;
//!
//! let line = Request::new("1", "READ").with_key("name").to_line();
//! let request = parse_request(&line).unwrap();
//! assert_eq!(request.key.as_deref(), Some("name"));
//!
//! let response = Response::success("1", "READ", json!({"key": "name"}));
//! let bytes = response.to_line();
//! assert_eq!(bytes.last(), Some(&b'\n'));
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_request, ProtocolError};
pub use types::{now_millis, Request, Response, PARSE_COMMAND, UNKNOWN_COMMAND, UNKNOWN_ID};
