//! Storage Engine Module
//!
//! Everything between a decoded command and the cell grid.
//!
//! ## Architecture
//!
//! ```text
//!           ┌──────────────────────────────────────────┐
//!           │              BlockDatabase               │
//!           │  ┌───────────┐ ┌──────────┐ ┌─────────┐  │
//!           │  │ KeyIndex  │ │ValueCache│ │  Codec  │  │
//!           │  │ (RwLock)  │ │ (Mutex)  │ │         │  │
//!           │  └───────────┘ └──────────┘ └─────────┘  │
//!           │  ┌────────────────────────────────────┐  │
//!           │  │ region lock: CellGrid + Allocator  │  │
//!           │  └────────────────────────────────────┘  │
//!           └──────────────────────────────────────────┘
//!                 ▲                         ▲
//!                 │                         │
//!        ┌────────┴───────┐        ┌────────┴───────┐
//!        │  GridExecutor  │        │  CacheSweeper  │
//!        │ (grid thread)  │        │ (Tokio task)   │
//!        └────────────────┘        └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use gridkv::grid::{GridBounds, MemoryGrid, Position};
//! use gridkv::storage::{BlockDatabase, DatabaseOptions};
//! use bytes::Bytes;
//!
//! let grid = MemoryGrid::new(GridBounds::new(
//!     Position::new(0, 0, 0),
//!     Position::new(15, 3, 15),
//! ));
//! let db = BlockDatabase::open(Box::new(grid), DatabaseOptions::default()).unwrap();
//!
//! db.write("name", Bytes::from("Ariz")).unwrap();
//! assert_eq!(db.read("name").unwrap(), Bytes::from("Ariz"));
//! ```

pub mod allocator;
pub mod codec;
pub mod engine;
pub mod executor;
pub mod expiry;
pub mod index;

pub use allocator::{Address, SpaceAllocator};
pub use codec::{Palette, SymbolCodec};
pub use engine::{BlockDatabase, DatabaseOptions, DatabaseStats};
pub use executor::GridExecutor;
pub use expiry::{CacheSweeper, SweeperConfig};
pub use index::{KeyIndex, ValueCache};
