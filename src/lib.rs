//! # GridKV - A Key-Value Database Stored in a Cell Grid
//!
//! GridKV keeps every key and value as a run of symbols in a bounded 3D grid
//! of cells. An in-memory index maps keys to their runs, a bounded TTL cache
//! keeps recent values hot, and a line-delimited JSON protocol over TCP
//! exposes the store to authenticated clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              GridKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ writes, deletes,        │
//! │                                               │ cache misses            │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   JSON      │    │  GridExecutor (one thread)                   │    │
//! │  │   Lines     │    │    └─> BlockDatabase                         │    │
//! │  └─────────────┘    │          ├─ SymbolCodec                      │    │
//! │                     │          ├─ SpaceAllocator                   │    │
//! │                     │          ├─ KeyIndex + ValueCache            │    │
//! │                     │          └─ CellGrid                         │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           CacheSweeper                          │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridkv::config::Config;
//! use gridkv::grid::MemoryGrid;
//! use gridkv::server::{CommandServer, ServerContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let grid = MemoryGrid::new(config.storage.bounds());
//!     let ctx = ServerContext::open(config, Box::new(grid))?;
//!
//!     let server = CommandServer::bind(ctx).await?;
//!     server.run_until(async { tokio::signal::ctrl_c().await.unwrap_or(()) }).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id":"1","auth":"secret","command":"WRITE","data":{"key":"a","value":"aGk="}}
//! <- {"id":"1","success":true,"command":"WRITE","data":{"key":"a","size":2,...},"error":null,"timestamp":...}
//! ```
//!
//! ```
//! let line = br#"{"id":"1","auth":"secret","command":"WRITE","data":{"key":"a","value":"aGk="}}"#;
//! let request = gridkv::protocol::parse_request(line).unwrap();
//! assert_eq!(request.key.as_deref(), Some("a"));
//! assert_eq!(request.value.as_deref(), Some(&b"hi"[..]));
//! ```
//!
//! Commands: `WRITE`, `READ`, `DELETE`, `EXISTS`, `LIST`, `STATS`. Values
//! travel as base64.
//!
//! ## Module Overview
//!
//! - [`grid`]: the cell grid abstraction, an in-memory grid, and the region guard
//! - [`storage`]: codec, allocator, index, cache, engine and grid executor
//! - [`protocol`]: request/response types and the line parser
//! - [`commands`]: command dispatch
//! - [`connection`]: per-client connection handling
//! - [`server`]: listener, connection limit and shared context
//! - [`console`] and [`permissions`]: admin commands and access lists
//! - [`client`]: async client for the line protocol

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod grid;
pub mod permissions;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use error::{StoreError, StoreResult};
pub use protocol::{Request, Response};
pub use server::{CommandServer, ServerContext};
pub use storage::{BlockDatabase, CacheSweeper, GridExecutor};

/// The default port GridKV listens on
pub const DEFAULT_PORT: u16 = 25566;

/// The default host GridKV binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of GridKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
