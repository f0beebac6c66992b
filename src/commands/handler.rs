//! Command Handler
//!
//! Validates a decoded [`Request`], runs it against the database and builds
//! the response envelope.
//!
//! ## Supported Commands
//!
//! - `WRITE key value` - Store a value
//! - `READ key` - Fetch a value
//! - `DELETE key` - Remove a key
//! - `LIST` - All keys, sorted
//! - `EXISTS key` - Key presence
//! - `STATS` - Database and server counters
//!
//! Command names are case-insensitive.
//!
//! ## Where Commands Run
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ connection task                                            │
//! │   READ (cache hit), LIST, EXISTS, STATS                    │
//! │                                                            │
//! │   WRITE, DELETE, READ (cache miss) ──> GridExecutor.run()  │
//! └────────────────────────────────────────────────────────────┘
//! ```

use crate::connection::ConnectionStats;
use crate::error::{StoreError, StoreResult};
use crate::protocol::{Request, Response, UNKNOWN_COMMAND, UNKNOWN_ID};
use crate::storage::{BlockDatabase, GridExecutor};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error};

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Write,
    Read,
    Delete,
    List,
    Exists,
    Stats,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Write => "WRITE",
            Command::Read => "READ",
            Command::Delete => "DELETE",
            Command::List => "LIST",
            Command::Exists => "EXISTS",
            Command::Stats => "STATS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = ();

    /// Expects an already uppercased name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WRITE" => Ok(Command::Write),
            "READ" => Ok(Command::Read),
            "DELETE" => Ok(Command::Delete),
            "LIST" => Ok(Command::List),
            "EXISTS" => Ok(Command::Exists),
            "STATS" => Ok(Command::Stats),
            _ => Err(()),
        }
    }
}

/// Failure of one command, before it is wrapped in an envelope.
enum Failure {
    MissingKey,
    MissingValue,
    Store(StoreError),
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure::Store(e)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::MissingKey => f.write_str("Missing key"),
            Failure::MissingValue => f.write_str("Missing value"),
            Failure::Store(e) => write!(f, "{}", e),
        }
    }
}

/// Executes commands. Cheap to clone: one per connection.
#[derive(Clone)]
pub struct CommandHandler {
    executor: GridExecutor,
    stats: Arc<ConnectionStats>,
}

impl CommandHandler {
    pub fn new(executor: GridExecutor, stats: Arc<ConnectionStats>) -> Self {
        Self { executor, stats }
    }

    fn db(&self) -> &BlockDatabase {
        self.executor.db()
    }

    /// Executes a request and returns the response to send back.
    pub async fn execute(&self, request: &Request) -> Response {
        let id = match request.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return Response::error(UNKNOWN_ID, UNKNOWN_COMMAND, "Missing request ID"),
        };

        let name = match request.command.as_deref() {
            Some(name) if !name.is_empty() => name.to_uppercase(),
            _ => return Response::error(id, UNKNOWN_COMMAND, "Missing command"),
        };

        let Ok(command) = name.parse::<Command>() else {
            debug!(command = %name, "Unknown command");
            return Response::error(id, name.as_str(), format!("Unknown command: {}", name));
        };

        match self.dispatch(command, request).await {
            Ok(data) => Response::success(id, command.name(), data),
            Err(failure) => {
                if let Failure::Store(StoreError::Internal(msg)) = &failure {
                    error!(command = %command, error = %msg, "Command failed");
                }
                Response::error(id, command.name(), failure.to_string())
            }
        }
    }

    async fn dispatch(&self, command: Command, request: &Request) -> Result<Value, Failure> {
        match command {
            Command::Write => self.cmd_write(request).await,
            Command::Read => self.cmd_read(request).await,
            Command::Delete => self.cmd_delete(request).await,
            Command::List => Ok(self.cmd_list()),
            Command::Exists => self.cmd_exists(request),
            Command::Stats => Ok(self.cmd_stats()),
        }
    }

    /// WRITE key value
    async fn cmd_write(&self, request: &Request) -> Result<Value, Failure> {
        let key = required_key(request)?;
        let value = request.value.clone().ok_or(Failure::MissingValue)?;
        let size = value.len();

        let owned_key = key.to_string();
        self.executor
            .run(move |db| db.write(&owned_key, value).map(|_| ()))
            .await?;

        Ok(json!({
            "key": key,
            "size": size,
            "message": "Data written successfully",
        }))
    }

    /// READ key
    async fn cmd_read(&self, request: &Request) -> Result<Value, Failure> {
        let key = required_key(request)?;

        let value = match self.db().cached(key) {
            Some(value) => value,
            None => {
                let owned_key = key.to_string();
                self.executor.run(move |db| db.read(&owned_key)).await?
            }
        };

        Ok(json!({
            "key": key,
            "value": STANDARD.encode(&value),
            "size": value.len(),
        }))
    }

    /// DELETE key
    async fn cmd_delete(&self, request: &Request) -> Result<Value, Failure> {
        let key = required_key(request)?;

        let owned_key = key.to_string();
        self.executor.run(move |db| db.delete(&owned_key)).await?;

        Ok(json!({
            "key": key,
            "message": "Data deleted successfully",
        }))
    }

    /// LIST
    fn cmd_list(&self) -> Value {
        let keys = self.db().list_keys();
        let count = keys.len();
        json!({ "keys": keys, "count": count })
    }

    /// EXISTS key
    fn cmd_exists(&self, request: &Request) -> Result<Value, Failure> {
        let key = required_key(request)?;
        Ok(json!({ "key": key, "exists": self.db().exists(key) }))
    }

    /// STATS
    fn cmd_stats(&self) -> Value {
        let stats = self.db().stats();
        json!({
            "entries": stats.entries,
            "capacity": stats.capacity,
            "used_percent": stats.used_percent,
            "cache_size": stats.cache_size,
            "chunks": stats.chunks,
            "connections": self.stats.active_connections.load(Ordering::Relaxed),
        })
    }
}

fn required_key(request: &Request) -> Result<&str, Failure> {
    match request.key.as_deref() {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(Failure::MissingKey),
    }
}

/// Runs a closure on the grid thread from synchronous code, such as the
/// console. Must not be called from inside the Tokio runtime.
pub fn run_blocking<T, F>(executor: &GridExecutor, op: F) -> StoreResult<T>
where
    F: FnOnce(&BlockDatabase) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    executor.submit(move |db| {
        let _ = tx.send(op(db));
    })?;
    rx.recv_timeout(executor.timeout())
        .map_err(|_| StoreError::Internal("grid operation timed out".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellGrid, GridBounds, GridError, MemoryGrid, Position, Symbol};
    use crate::storage::DatabaseOptions;
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    fn create_handler() -> CommandHandler {
        let grid = MemoryGrid::new(GridBounds::new(
            Position::new(0, 0, 0),
            Position::new(15, 3, 15),
        ));
        let options = DatabaseOptions {
            log_operations: false,
            ..Default::default()
        };
        let db = Arc::new(BlockDatabase::open(Box::new(grid), options).unwrap());
        let executor = GridExecutor::start(db, Duration::from_secs(5)).unwrap();
        CommandHandler::new(executor, Arc::new(ConnectionStats::new()))
    }

    fn write(id: &str, key: &str, value: &str) -> Request {
        Request::new(id, "WRITE").with_key(key).with_value(value.to_string())
    }

    #[tokio::test]
    async fn test_write_read_delete_scenario() {
        let handler = create_handler();

        let resp = handler.execute(&write("1", "a", "hi")).await;
        assert!(resp.success);
        assert_eq!(resp.command, "WRITE");
        assert_eq!(resp.field("size"), Some(&json!(2)));
        assert_eq!(resp.field("message"), Some(&json!("Data written successfully")));

        let resp = handler.execute(&Request::new("2", "READ").with_key("a")).await;
        assert!(resp.success);
        assert_eq!(resp.field("value"), Some(&json!("aGk=")));
        assert_eq!(resp.field("size"), Some(&json!(2)));

        let resp = handler.execute(&Request::new("3", "DELETE").with_key("a")).await;
        assert!(resp.success);
        assert_eq!(resp.field("message"), Some(&json!("Data deleted successfully")));

        let resp = handler.execute(&Request::new("4", "READ").with_key("a")).await;
        assert!(!resp.success);
        assert_eq!(resp.id, "4");
        assert_eq!(resp.command, "READ");
        assert_eq!(resp.error.as_deref(), Some("Key not found: a"));
        assert_eq!(resp.data, None);
    }

    #[tokio::test]
    async fn test_read_after_cache_expiry_goes_to_grid() {
        let handler = create_handler();
        handler.execute(&write("1", "k", "value")).await;
        handler.db().reconfigure_cache(0, Duration::from_secs(1));

        let resp = handler.execute(&Request::new("2", "read").with_key("k")).await;
        assert!(resp.success);
        assert_eq!(resp.field("value"), Some(&json!(STANDARD.encode("value"))));
    }

    #[tokio::test]
    async fn test_missing_id() {
        let handler = create_handler();
        let request = Request {
            command: Some("LIST".into()),
            ..Default::default()
        };

        let resp = handler.execute(&request).await;
        assert!(!resp.success);
        assert_eq!(resp.id, "unknown");
        assert_eq!(resp.command, "UNKNOWN");
        assert_eq!(resp.error.as_deref(), Some("Missing request ID"));

        let resp = handler.execute(&Request::new("", "LIST")).await;
        assert_eq!(resp.command, "UNKNOWN");
    }

    #[tokio::test]
    async fn test_missing_command() {
        let handler = create_handler();
        let request = Request {
            id: Some("9".into()),
            ..Default::default()
        };

        let resp = handler.execute(&request).await;
        assert_eq!(resp.id, "9");
        assert_eq!(resp.command, "UNKNOWN");
        assert_eq!(resp.error.as_deref(), Some("Missing command"));
    }

    #[tokio::test]
    async fn test_unknown_command_is_uppercased() {
        let handler = create_handler();
        let resp = handler.execute(&Request::new("1", "flush")).await;
        assert!(!resp.success);
        assert_eq!(resp.command, "FLUSH");
        assert_eq!(resp.error.as_deref(), Some("Unknown command: FLUSH"));
    }

    #[tokio::test]
    async fn test_missing_key_and_value() {
        let handler = create_handler();

        for name in ["WRITE", "READ", "DELETE", "EXISTS"] {
            let resp = handler.execute(&Request::new("1", name)).await;
            assert_eq!(resp.command, name);
            assert_eq!(resp.error.as_deref(), Some("Missing key"));
        }

        let resp = handler
            .execute(&Request::new("1", "WRITE").with_key("k"))
            .await;
        assert_eq!(resp.command, "WRITE");
        assert_eq!(resp.error.as_deref(), Some("Missing value"));
    }

    #[tokio::test]
    async fn test_empty_value_is_allowed() {
        let handler = create_handler();
        let request = Request::new("1", "WRITE")
            .with_key("k")
            .with_value(Bytes::new());

        let resp = handler.execute(&request).await;
        assert!(resp.success);
        assert_eq!(resp.field("size"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_list_and_exists() {
        let handler = create_handler();
        handler.execute(&write("1", "b", "2")).await;
        handler.execute(&write("2", "a", "1")).await;

        let resp = handler.execute(&Request::new("3", "LIST")).await;
        assert_eq!(resp.field("keys"), Some(&json!(["a", "b"])));
        assert_eq!(resp.field("count"), Some(&json!(2)));

        let resp = handler.execute(&Request::new("4", "Exists").with_key("a")).await;
        assert_eq!(resp.command, "EXISTS");
        assert_eq!(resp.field("exists"), Some(&json!(true)));

        let resp = handler.execute(&Request::new("5", "EXISTS").with_key("z")).await;
        assert_eq!(resp.field("exists"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_stats() {
        let handler = create_handler();
        handler.execute(&write("1", "a", "1")).await;

        let resp = handler.execute(&Request::new("2", "STATS")).await;
        assert!(resp.success);
        assert_eq!(resp.field("entries"), Some(&json!(1)));
        // 1024 cells / 48 per entry
        assert_eq!(resp.field("capacity"), Some(&json!(21)));
        assert_eq!(resp.field("used_percent"), Some(&json!(4)));
        assert_eq!(resp.field("cache_size"), Some(&json!(1)));
        assert_eq!(resp.field("chunks"), Some(&json!(1)));
        assert_eq!(resp.field("connections"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let handler = create_handler();
        let resp = handler.execute(&Request::new("1", "DELETE").with_key("nope")).await;
        assert_eq!(resp.error.as_deref(), Some("Key not found: nope"));
    }

    #[test]
    fn test_run_blocking_outside_runtime() {
        let handler = create_handler();
        let n = run_blocking(&handler.executor, |db| {
            db.write("k", Bytes::from("v"))?;
            Ok(db.entry_count())
        })
        .unwrap();
        assert_eq!(n, 1);
    }

    /// Grid whose writes are slow enough to hold the region lock for a while.
    struct SlowGrid(MemoryGrid);

    impl CellGrid for SlowGrid {
        fn bounds(&self) -> GridBounds {
            self.0.bounds()
        }

        fn get_cell(&self, pos: Position) -> Result<Symbol, GridError> {
            self.0.get_cell(pos)
        }

        fn set_cell(&mut self, pos: Position, symbol: Symbol) -> Result<(), GridError> {
            std::thread::sleep(Duration::from_millis(40));
            self.0.set_cell(pos, symbol)
        }

        fn is_within_managed_region(&self, pos: Position) -> bool {
            self.0.is_within_managed_region(pos)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_stats_not_blocked_by_grid_work() {
        let grid = SlowGrid(MemoryGrid::new(GridBounds::new(
            Position::new(0, 0, 0),
            Position::new(7, 0, 0),
        )));
        let options = DatabaseOptions {
            log_operations: false,
            clear_on_startup: false,
            ..Default::default()
        };
        let db = Arc::new(BlockDatabase::open(Box::new(grid), options).unwrap());
        let executor = GridExecutor::start(db, Duration::from_secs(5)).unwrap();
        let handler = CommandHandler::new(executor.clone(), Arc::new(ConnectionStats::new()));

        // Eight slow cell writes keep the region locked for ~320ms
        executor
            .submit(|db| {
                let _ = db.clear_all();
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let resp = handler.execute(&Request::new("1", "STATS")).await;
        assert!(resp.success);
        assert_eq!(resp.field("chunks"), Some(&json!(1)));
        assert!(
            started.elapsed() < Duration::from_millis(150),
            "STATS waited {:?}",
            started.elapsed()
        );
    }
}
