//! Async Client
//!
//! A small line-protocol client. Every request it builds carries the auth
//! token and a fresh numeric id.
//!
//! ```ignore
//! let mut client = GridClient::connect("127.0.0.1:25566", "secret").await?;
//! client.write("name", "Ariz").await?;
//! let resp = client.read("name").await?;
//! assert_eq!(resp.field("size"), Some(&serde_json::json!(4)));
//! ```

use crate::protocol::{Request, Response};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// How long the client waits for one response line.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("server closed the connection")]
    Closed,
}

pub struct GridClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    token: String,
    next_id: u64,
    response_timeout: Duration,
}

impl GridClient {
    pub async fn connect(addr: impl ToSocketAddrs, token: impl Into<String>) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
            token: token.into(),
            next_id: 1,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Builds an authenticated request with the next id.
    pub fn request(&mut self, command: &str) -> Request {
        let id = self.next_id;
        self.next_id += 1;
        Request::new(id.to_string(), command).with_auth(self.token.clone())
    }

    /// Sends raw bytes and reads one response line.
    ///
    /// Returns `Ok(None)` if the server closed the connection instead.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<Option<Response>, ClientError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        self.next_response().await
    }

    /// Sends `request` as-is and reads one response line.
    pub async fn send(&mut self, request: &Request) -> Result<Option<Response>, ClientError> {
        self.send_raw(&request.to_line()).await
    }

    /// Reads the next response line. `Ok(None)` on end of stream.
    pub async fn next_response(&mut self) -> Result<Option<Response>, ClientError> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.response_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout(self.response_timeout))??;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Response::from_line(line.as_bytes())?))
    }

    async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        self.send(&request).await?.ok_or(ClientError::Closed)
    }

    pub async fn write(&mut self, key: &str, value: impl Into<Bytes>) -> Result<Response, ClientError> {
        let request = self.request("WRITE").with_key(key).with_value(value);
        self.call(request).await
    }

    pub async fn read(&mut self, key: &str) -> Result<Response, ClientError> {
        let request = self.request("READ").with_key(key);
        self.call(request).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<Response, ClientError> {
        let request = self.request("DELETE").with_key(key);
        self.call(request).await
    }

    pub async fn exists(&mut self, key: &str) -> Result<Response, ClientError> {
        let request = self.request("EXISTS").with_key(key);
        self.call(request).await
    }

    pub async fn list(&mut self) -> Result<Response, ClientError> {
        let request = self.request("LIST");
        self.call(request).await
    }

    pub async fn stats(&mut self) -> Result<Response, ClientError> {
        let request = self.request("STATS");
        self.call(request).await
    }
}
