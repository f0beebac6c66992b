//! Connection Handler
//!
//! Each client gets its own task that reads request lines, runs them and
//! writes one response line per request.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!   Connected
//!       │ first line
//!       ▼
//!   Authenticating ──token mismatch──> send "Authentication failed" ──> Closed
//!       │ token match
//!       ▼
//!   Authenticated ◄──┐
//!       │            │ next line (auth not re-checked)
//!       └────────────┘
//!
//!   I/O error, idle timeout, oversize line, peer close ──> Closed
//! ```
//!
//! A line that is not a valid request gets a `PARSE` error reply and does not
//! count as an authentication attempt.
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` until a `\n` arrives. TCP may
//! deliver half a line or several lines in one read; requests on one
//! connection are handled strictly in order.

use crate::commands::CommandHandler;
use crate::error::StoreError;
use crate::protocol::{parse_request, ProtocolError, Response, UNKNOWN_COMMAND, UNKNOWN_ID};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Logs at info when connection logging is on, debug otherwise.
macro_rules! conn_event {
    ($settings:expr, $($arg:tt)+) => {
        if $settings.log_connections {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Connections refused because the server was full
    pub connections_rejected: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticating,
    Authenticated,
    Closed,
}

/// Per-connection settings, snapshotted when the connection is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub auth_token: String,
    pub idle_timeout: Duration,
    pub max_line_bytes: usize,
    pub log_connections: bool,
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    settings: ConnectionSettings,

    state: ConnectionState,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        settings: ConnectionSettings,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
            settings,
            state: ConnectionState::Connected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connection until the client leaves or the connection fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        conn_event!(
            self.settings,
            client = %self.addr,
            active = self.stats.active(),
            "Client connected"
        );

        let result = self.main_loop().await;
        self.state = ConnectionState::Closed;

        match &result {
            Ok(()) => {}
            Err(ConnectionError::ClientDisconnected) => {}
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::IdleTimeout(_)) => {
                conn_event!(self.settings, client = %self.addr, "Connection timed out")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        conn_event!(
            self.settings,
            client = %self.addr,
            active = self.stats.active(),
            "Connection closed"
        );
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let result = self.serve().await;
        if let Err(ConnectionError::LineTooLong(ref err)) = result {
            let _ = self.send_response(&err.to_response()).await;
        }
        result
    }

    /// The read-execute-respond loop.
    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(line) = self.next_line()? {
                self.handle_line(line).await?;
                if self.state == ConnectionState::Closed {
                    return Ok(());
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Splits the next complete line off the buffer.
    fn next_line(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        if pos > self.settings.max_line_bytes {
            return Err(ConnectionError::LineTooLong(ProtocolError::LineTooLong {
                max: self.settings.max_line_bytes,
            }));
        }

        let line = self.buffer.split_to(pos + 1).freeze();
        trace!(
            client = %self.addr,
            bytes = line.len(),
            remaining = self.buffer.len(),
            "Framed line"
        );
        Ok(Some(line))
    }

    async fn handle_line(&mut self, line: Bytes) -> Result<(), ConnectionError> {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(());
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                return self.send_response(&e.to_response()).await;
            }
        };

        if self.state != ConnectionState::Authenticated {
            self.state = ConnectionState::Authenticating;

            if request.auth.as_deref() != Some(self.settings.auth_token.as_str()) {
                warn!(client = %self.addr, "Authentication failed");
                let response = Response::error(
                    request.id.as_deref().unwrap_or(UNKNOWN_ID),
                    request.command.as_deref().unwrap_or(UNKNOWN_COMMAND),
                    StoreError::Auth.to_string(),
                );
                self.send_response(&response).await?;
                self.state = ConnectionState::Closed;
                return Ok(());
            }

            debug!(client = %self.addr, "Client authenticated");
            self.state = ConnectionState::Authenticated;
        }

        let response = self.command_handler.execute(&request).await;
        self.stats.command_processed();
        self.send_response(&response).await
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() > self.settings.max_line_bytes {
            return Err(ConnectionError::LineTooLong(ProtocolError::LineTooLong {
                max: self.settings.max_line_bytes,
            }));
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let idle = self.settings.idle_timeout;
        let n = tokio::time::timeout(idle, self.stream.get_mut().read_buf(&mut self.buffer))
            .await
            .map_err(|_| ConnectionError::IdleTimeout(idle))??;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn send_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let bytes = response.to_line();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            success = response.success,
            "Sent response"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    LineTooLong(ProtocolError),

    #[error("no data for {0:?}")]
    IdleTimeout(Duration),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial line)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Handles a client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    settings: ConnectionSettings,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, settings);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
