//! Command Handler Module
//!
//! Receives parsed requests, executes them against the block database and
//! returns response envelopes.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Line Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Envelope     │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  GridExecutor   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! `WRITE`, `READ`, `DELETE`, `LIST`, `EXISTS`, `STATS`

pub mod handler;

pub use handler::{run_blocking, Command, CommandHandler};
