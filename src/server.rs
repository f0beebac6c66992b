//! Command Server
//!
//! One acceptor loop plus one task per connection, bounded by
//! `server.max_connections`.
//!
//! ```text
//!   accept() ──> permit available? ──no──> close socket, count as rejected
//!                      │ yes
//!                      ▼
//!              spawn connection task (holds the permit until it ends)
//! ```
//!
//! Everything the tasks share lives in one [`ServerContext`], built once at
//! startup and passed around explicitly.

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionSettings, ConnectionStats};
use crate::error::StoreResult;
use crate::grid::{CellGrid, RegionGuard};
use crate::storage::{BlockDatabase, DatabaseOptions, GridExecutor};
use parking_lot::RwLock;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Shared state of a running server.
pub struct ServerContext {
    db: Arc<BlockDatabase>,
    executor: GridExecutor,
    stats: Arc<ConnectionStats>,
    guard: RegionGuard,
    /// Checked against the first message of every new connection
    auth_token: RwLock<String>,
    config: RwLock<Config>,
}

impl ServerContext {
    /// Opens the database over `grid` and starts the grid executor.
    pub fn open(config: Config, grid: Box<dyn CellGrid>) -> StoreResult<Arc<Self>> {
        let db = Arc::new(BlockDatabase::open(grid, DatabaseOptions::from(&config))?);
        let executor = GridExecutor::start(Arc::clone(&db), config.server.operation_timeout())?;

        Ok(Arc::new(Self {
            db,
            executor,
            stats: Arc::new(ConnectionStats::new()),
            guard: RegionGuard::new(config.protection.clone()),
            auth_token: RwLock::new(config.server.auth_token.clone()),
            config: RwLock::new(config),
        }))
    }

    pub fn db(&self) -> &Arc<BlockDatabase> {
        &self.db
    }

    pub fn executor(&self) -> &GridExecutor {
        &self.executor
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Protection rules for grid providers that report outside changes.
    pub fn guard(&self) -> &RegionGuard {
        &self.guard
    }

    pub fn auth_token(&self) -> String {
        self.auth_token.read().clone()
    }

    /// Applies to connections accepted from now on.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.auth_token.write() = token.into();
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Applies a reloaded configuration: auth token and cache limits take
    /// effect immediately. Listener, grid region and connection limit keep
    /// their startup values.
    pub fn apply_config(&self, config: Config) {
        self.set_auth_token(config.server.auth_token.clone());
        self.db.reconfigure_cache(config.cache.size, config.cache.ttl());
        *self.config.write() = config;
        info!("Configuration reloaded");
    }

    fn connection_settings(&self) -> ConnectionSettings {
        let config = self.config.read();
        ConnectionSettings {
            auth_token: self.auth_token(),
            idle_timeout: config.server.idle_timeout(),
            max_line_bytes: config.server.max_line_bytes,
            log_connections: config.logging.log_connections,
        }
    }
}

/// The TCP front end.
pub struct CommandServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    limiter: Arc<Semaphore>,
    max_connections: usize,
}

impl CommandServer {
    /// Binds the listener configured in `ctx`.
    pub async fn bind(ctx: Arc<ServerContext>) -> std::io::Result<Self> {
        let server = ctx.config().server;
        let listener = TcpListener::bind(server.bind_address()).await?;
        info!(address = %listener.local_addr()?, max_connections = server.max_connections, "Listening");

        Ok(Self {
            listener,
            ctx,
            limiter: Arc::new(Semaphore::new(server.max_connections)),
            max_connections: server.max_connections,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) {
        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }
    }

    /// Accepts connections forever.
    pub async fn run(self) {
        self.accept_loop().await
    }

    async fn accept_loop(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let Ok(permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
                        self.ctx.stats.connection_rejected();
                        warn!(
                            client = %addr,
                            max = self.max_connections,
                            "Connection limit reached, refusing connection"
                        );
                        drop(stream);
                        continue;
                    };

                    let handler =
                        CommandHandler::new(self.ctx.executor.clone(), Arc::clone(&self.ctx.stats));
                    let stats = Arc::clone(&self.ctx.stats);
                    let settings = self.ctx.connection_settings();

                    tokio::spawn(async move {
                        handle_connection(stream, addr, handler, stats, settings).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GridClient;
    use crate::grid::{GridBounds, MemoryGrid, Position};
    use crate::protocol::Request;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const TOKEN: &str = "test-token";

    fn test_config(max_connections: usize) -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.auth_token = TOKEN.to_string();
        config.server.max_connections = max_connections;
        config.logging.log_operations = false;
        config.logging.log_connections = false;
        config
    }

    async fn start_server(config: Config) -> (SocketAddr, Arc<ServerContext>) {
        let grid = MemoryGrid::new(GridBounds::new(
            Position::new(0, 0, 0),
            Position::new(31, 7, 31),
        ));
        let ctx = ServerContext::open(config, Box::new(grid)).unwrap();
        let server = CommandServer::bind(Arc::clone(&ctx)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (addr, ctx)
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let (addr, _) = start_server(test_config(10)).await;
        let mut client = GridClient::connect(addr, TOKEN).await.unwrap();

        let resp = client.write("a", "hi").await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.field("size"), Some(&json!(2)));

        let resp = client.read("a").await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.field("value"), Some(&json!("aGk=")));
        assert_eq!(resp.field("size"), Some(&json!(2)));

        let resp = client.delete("a").await.unwrap();
        assert!(resp.success);

        let resp = client.read("a").await.unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Key not found: a"));
    }

    #[tokio::test]
    async fn test_missing_id_over_the_wire() {
        let (addr, _) = start_server(test_config(10)).await;
        let mut client = GridClient::connect(addr, TOKEN).await.unwrap();

        let request = Request {
            auth: Some(TOKEN.to_string()),
            command: Some("LIST".to_string()),
            ..Default::default()
        };
        let resp = client.send(&request).await.unwrap().unwrap();
        assert!(!resp.success);
        assert_eq!(resp.id, "unknown");
        assert_eq!(resp.command, "UNKNOWN");
    }

    #[tokio::test]
    async fn test_connection_limit_refuses() {
        let (addr, ctx) = start_server(test_config(1)).await;

        let mut first = GridClient::connect(addr, TOKEN).await.unwrap();
        assert!(first.list().await.unwrap().success);

        let mut second = GridClient::connect(addr, TOKEN)
            .await
            .unwrap()
            .with_response_timeout(Duration::from_secs(2));
        assert!(second.list().await.is_err());
        assert_eq!(ctx.stats().connections_rejected.load(Ordering::Relaxed), 1);

        // The slot frees up once the first client leaves
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut third = GridClient::connect(addr, TOKEN).await.unwrap();
        assert!(third.list().await.unwrap().success);
    }

    #[tokio::test]
    async fn test_concurrent_clients_distinct_keys() {
        let (addr, ctx) = start_server(test_config(10)).await;
        let mut tasks = Vec::new();

        for c in 0..8 {
            tasks.push(tokio::spawn(async move {
                let mut client = GridClient::connect(addr, TOKEN).await.unwrap();
                for i in 0..10 {
                    let resp = client
                        .write(&format!("c{}:k{}", c, i), format!("value {} {}", c, i))
                        .await
                        .unwrap();
                    assert!(resp.success, "{:?}", resp.error);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(ctx.db().entry_count(), 80);
        let mut client = GridClient::connect(addr, TOKEN).await.unwrap();
        let resp = client.read("c3:k7").await.unwrap();
        assert_eq!(resp.field("size"), Some(&json!("value 3 7".len())));

        let bounds = ctx.db().bounds();
        let keys = ctx.db().list_keys();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                let (a, b) = (ctx.db().address_of(a).unwrap(), ctx.db().address_of(b).unwrap());
                assert!(!a.overlaps(&b, &bounds));
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_clients_same_key() {
        let (addr, ctx) = start_server(test_config(10)).await;
        let mut tasks = Vec::new();

        for c in 0..6 {
            tasks.push(tokio::spawn(async move {
                let mut client = GridClient::connect(addr, TOKEN).await.unwrap();
                for i in 0..5 {
                    client.write("shared", format!("{}-{}", c, i)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(ctx.db().list_keys(), vec!["shared"]);
        let value = ctx.db().read("shared").unwrap();
        assert!(std::str::from_utf8(&value).unwrap().ends_with("-4"));
    }

    #[tokio::test]
    async fn test_token_change_applies_to_new_connections() {
        let (addr, ctx) = start_server(test_config(10)).await;
        let mut old = GridClient::connect(addr, TOKEN).await.unwrap();
        assert!(old.list().await.unwrap().success);

        let mut config = ctx.config();
        config.server.auth_token = "rotated".to_string();
        config.cache.size = 5;
        ctx.apply_config(config);

        // Already authenticated connections are unaffected
        assert!(old.list().await.unwrap().success);

        let mut stale = GridClient::connect(addr, TOKEN).await.unwrap();
        let resp = stale.list().await.unwrap();
        assert_eq!(resp.error.as_deref(), Some("Authentication failed"));

        let mut fresh = GridClient::connect(addr, "rotated").await.unwrap();
        assert!(fresh.list().await.unwrap().success);
    }

    #[tokio::test]
    async fn test_guard_follows_protection_config() {
        let mut config = test_config(10);
        config.protection.bypass = vec!["maintenance".to_string()];
        let (_, ctx) = start_server(config).await;

        let grid = MemoryGrid::new(ctx.db().bounds());
        let inside = Position::new(1, 1, 1);
        assert!(!ctx.guard().check_change(&grid, "visitor", inside).is_allowed());
        assert!(ctx.guard().check_change(&grid, "maintenance", inside).is_allowed());
    }
}
