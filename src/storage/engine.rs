//! Grid-Backed Storage Engine
//!
//! `BlockDatabase` ties the codec, allocator, index, cache and grid together.
//!
//! ## Write Path
//!
//! ```text
//! write(key, value)
//!   │
//!   ├─ key exists? ──yes──> erase old run, drop index + cache entries
//!   │
//!   ├─ codec.encode(value) ──> n symbols
//!   ├─ allocator.find_space(n) ──none──> CapacityError
//!   ├─ grid.set_cell(...) for each symbol
//!   └─ index.put + cache.put
//! ```
//!
//! ## Concurrency Model
//!
//! The grid and the allocator cursor live together behind one lock, and every
//! operation that touches either (write, delete, clear, cache-miss read) holds
//! it for its whole duration. Index lookups for `exists`/`list_keys` and cache
//! hits never take that lock.
//!
//! ## Known Gap
//!
//! Overwriting a key erases the old run *before* space for the new value is
//! found. If allocation then fails the key is gone: callers must treat a
//! failed overwrite as loss of the previous value.

use super::allocator::{Address, SpaceAllocator};
use super::codec::{Palette, SymbolCodec};
use super::index::{KeyIndex, ValueCache};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::grid::{CellGrid, GridBounds, Symbol};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Logs at info when operation logging is on, debug otherwise.
macro_rules! op_event {
    ($db:expr, $($arg:tt)+) => {
        if $db.options.log_operations {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Tunables for a [`BlockDatabase`].
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseOptions {
    pub palette: Palette,
    pub compression: bool,
    pub cache_size: usize,
    pub cache_ttl: Duration,
    pub blocks_per_key: usize,
    pub blocks_per_value: usize,
    pub clear_on_startup: bool,
    pub log_operations: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DatabaseOptions {
    fn from(config: &Config) -> Self {
        Self {
            palette: config.storage.encoding,
            compression: config.storage.compression,
            cache_size: config.cache.size,
            cache_ttl: config.cache.ttl(),
            blocks_per_key: config.storage.blocks_per_key,
            blocks_per_value: config.storage.blocks_per_value,
            clear_on_startup: config.storage.clear_on_startup,
            log_operations: config.logging.log_operations,
        }
    }
}

/// Everything guarded by the region lock.
struct Region {
    grid: Box<dyn CellGrid>,
    allocator: SpaceAllocator,
}

/// The storage engine.
///
/// Designed to be wrapped in an `Arc` and shared by the grid executor, the
/// connection tasks and the console. All methods take `&self`.
pub struct BlockDatabase {
    region: Mutex<Region>,
    bounds: GridBounds,
    codec: SymbolCodec,
    index: KeyIndex,
    cache: ValueCache,
    options: DatabaseOptions,
    /// Chunk columns the provider reported at open
    chunks: usize,

    /// Statistics: total write operations
    write_count: AtomicU64,
    /// Statistics: total read operations
    read_count: AtomicU64,
    /// Statistics: total delete operations
    delete_count: AtomicU64,
    /// Statistics: reads served from the cache
    cache_hits: AtomicU64,
    /// Statistics: reads that went to the grid
    cache_misses: AtomicU64,
}

impl std::fmt::Debug for BlockDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDatabase")
            .field("bounds", &self.bounds)
            .field("codec", &self.codec)
            .field("entries", &self.index.len())
            .field("write_count", &self.write_count.load(Ordering::Relaxed))
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .finish()
    }
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::empty_key());
    }
    Ok(())
}

impl BlockDatabase {
    /// Opens the engine over `grid`.
    ///
    /// Fails if the declared region is not loaded by the provider. The index
    /// always starts empty: previously written runs stay in the grid but are
    /// unreachable.
    pub fn open(grid: Box<dyn CellGrid>, options: DatabaseOptions) -> StoreResult<Self> {
        let bounds = grid.bounds();
        for corner in [bounds.min, bounds.max] {
            if !grid.is_within_managed_region(corner) {
                return Err(StoreError::Internal(format!(
                    "grid region {}..{} is not available (corner {} not loaded)",
                    bounds.min, bounds.max, corner
                )));
            }
        }

        let chunks = grid.loaded_chunks();
        let db = Self {
            region: Mutex::new(Region {
                grid,
                allocator: SpaceAllocator::new(bounds),
            }),
            bounds,
            codec: SymbolCodec::new(options.palette, options.compression),
            index: KeyIndex::new(),
            cache: ValueCache::new(options.cache_size, options.cache_ttl),
            options,
            chunks,
            write_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        };

        info!(
            start = %bounds.min,
            end = %bounds.max,
            cells = bounds.total_cells(),
            capacity = db.estimated_capacity(),
            "Block database initialized"
        );

        db.rebuild_index();
        if db.index.is_empty() && db.options.clear_on_startup {
            db.prepare_region()?;
        }

        Ok(db)
    }

    /// No metadata is persisted next to the runs, so there is nothing to
    /// rebuild from: the index starts empty regardless of grid contents.
    fn rebuild_index(&self) {
        info!(entries = self.index.len(), "Index rebuilt");
    }

    /// Resets stray non-empty cells so the allocator can use them.
    fn prepare_region(&self) -> StoreResult<()> {
        let mut region = self.region.lock();
        let mut reset = 0usize;

        for offset in 0..self.bounds.total_cells() {
            let Some(pos) = self.bounds.position_at(offset) else {
                break;
            };
            if !region.grid.is_within_managed_region(pos) {
                continue;
            }
            if !region.grid.get_cell(pos)?.is_empty() {
                region.grid.set_cell(pos, Symbol::EMPTY)?;
                reset += 1;
            }
        }

        info!(
            checked = self.bounds.total_cells(),
            reset = reset,
            "Database area ready"
        );
        Ok(())
    }

    /// Writes `value` under `key`, replacing any existing value.
    ///
    /// Returns the address of the new run.
    pub fn write(&self, key: &str, value: Bytes) -> StoreResult<Address> {
        validate_key(key)?;
        self.write_count.fetch_add(1, Ordering::Relaxed);

        let symbols = self.codec.encode(&value);
        let mut guard = self.region.lock();
        let region = &mut *guard;

        if let Some(old) = self.index.get(key) {
            // The old value is gone from here on, even if allocation fails
            Self::erase_run(region, &self.bounds, old)?;
            self.index.remove(key);
            self.cache.remove(key);
            debug!(key = key, start = %old.start, cells = old.len, "Replaced entry erased");
        }

        op_event!(
            self,
            key = key,
            bytes = value.len(),
            cells = symbols.len(),
            "Writing entry"
        );

        let address = region
            .allocator
            .find_space(region.grid.as_ref(), symbols.len())?
            .ok_or(StoreError::Capacity {
                needed: symbols.len(),
            })?;

        if let Err(e) = Self::write_run(region, &self.bounds, address, &symbols) {
            warn!(key = key, error = %e, "Write failed midway, erasing partial run");
            if let Err(cleanup) = Self::erase_run(region, &self.bounds, address) {
                warn!(
                    key = key,
                    start = %address.start,
                    cells = address.len,
                    error = %cleanup,
                    "Could not erase partial run, cells stay occupied"
                );
            }
            return Err(e);
        }

        self.index.put(key, address);
        self.cache.put(key, value);

        op_event!(self, key = key, start = %address.start, "Written");
        Ok(address)
    }

    /// Reads the value stored under `key`.
    pub fn read(&self, key: &str) -> StoreResult<Bytes> {
        validate_key(key)?;

        if let Some(value) = self.cached(key) {
            return Ok(value);
        }
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let region = self.region.lock();
        let address = self
            .index
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        op_event!(self, key = key, start = %address.start, cells = address.len, "Reading entry");

        let symbols = Self::read_run(&region, &self.bounds, address)?;
        let data = self.codec.decode(&symbols)?;
        self.cache.put(key, data.clone());
        Ok(data)
    }

    /// Cache-only lookup. Never touches the grid.
    ///
    /// A hit counts as a read; a miss counts nothing until the grid read.
    pub fn cached(&self, key: &str) -> Option<Bytes> {
        let value = self.cache.get(key)?;
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        trace!(key = key, "Cache hit");
        Some(value)
    }

    /// Deletes `key`, returning its cells to EMPTY.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        self.delete_count.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.region.lock();
        let address = self
            .index
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        op_event!(self, key = key, start = %address.start, cells = address.len, "Deleting entry");

        Self::erase_run(&mut guard, &self.bounds, address)?;
        self.index.remove(key);
        self.cache.remove(key);
        Ok(())
    }

    /// Resets every cell to EMPTY and forgets every key.
    ///
    /// Returns the number of entries that existed before clearing.
    pub fn clear_all(&self) -> StoreResult<usize> {
        let mut region = self.region.lock();
        let count = self.index.len();

        for offset in 0..self.bounds.total_cells() {
            let Some(pos) = self.bounds.position_at(offset) else {
                break;
            };
            if region.grid.is_within_managed_region(pos) {
                region.grid.set_cell(pos, Symbol::EMPTY)?;
            }
        }

        self.index.clear();
        self.cache.clear();
        region.allocator.reset();

        info!(entries = count, "Database cleared");
        Ok(count)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    /// All keys, sorted.
    pub fn list_keys(&self) -> Vec<String> {
        self.index.keys()
    }

    /// Address of `key`'s run, if stored.
    pub fn address_of(&self, key: &str) -> Option<Address> {
        self.index.get(key)
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Number of live cache entries (expired ones are purged first).
    pub fn cache_size(&self) -> usize {
        self.cache.purge_expired();
        self.cache.len()
    }

    /// Cache entries physically held, expired or not.
    pub fn cache_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drops expired cache entries. Called by the cache sweeper.
    pub fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Applies new cache limits (used by configuration reload).
    pub fn reconfigure_cache(&self, capacity: usize, ttl: Duration) {
        self.cache.reconfigure(capacity, ttl);
        info!(capacity = capacity, ttl_secs = ttl.as_secs(), "Cache reconfigured");
    }

    /// `total_cells / (blocks_per_key + blocks_per_value)`.
    pub fn estimated_capacity(&self) -> usize {
        let per_entry = self.options.blocks_per_key + self.options.blocks_per_value;
        if per_entry == 0 {
            return 0;
        }
        self.bounds.total_cells() / per_entry
    }

    /// Entries as a percentage of the estimated capacity, 0 when the
    /// capacity is 0.
    pub fn used_percent(&self) -> usize {
        let capacity = self.estimated_capacity();
        if capacity == 0 {
            return 0;
        }
        self.entry_count() * 100 / capacity
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub fn codec(&self) -> SymbolCodec {
        self.codec
    }

    /// Never takes the region lock.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Counts non-empty cells in the managed region.
    ///
    /// **Warning**: scans the whole volume under the region lock.
    pub fn occupied_cells(&self) -> StoreResult<usize> {
        let region = self.region.lock();
        let mut occupied = 0;
        for offset in 0..self.bounds.total_cells() {
            let Some(pos) = self.bounds.position_at(offset) else {
                break;
            };
            if region.grid.is_within_managed_region(pos) && !region.grid.get_cell(pos)?.is_empty() {
                occupied += 1;
            }
        }
        Ok(occupied)
    }

    /// Returns database statistics.
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            entries: self.entry_count(),
            capacity: self.estimated_capacity(),
            used_percent: self.used_percent(),
            cache_size: self.cache_size(),
            chunks: self.chunk_count(),
            total_cells: self.bounds.total_cells(),
            writes: self.write_count.load(Ordering::Relaxed),
            reads: self.read_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    fn write_run(
        region: &mut Region,
        bounds: &GridBounds,
        address: Address,
        symbols: &[Symbol],
    ) -> StoreResult<()> {
        let offsets = Self::run_offsets(bounds, address)?;
        for (offset, &symbol) in offsets.zip(symbols) {
            let pos = bounds
                .position_at(offset)
                .ok_or_else(|| StoreError::Internal(format!("offset {} out of bounds", offset)))?;
            region.grid.set_cell(pos, symbol)?;
        }
        Ok(())
    }

    fn read_run(region: &Region, bounds: &GridBounds, address: Address) -> StoreResult<Vec<Symbol>> {
        let mut symbols = Vec::with_capacity(address.len);
        for offset in Self::run_offsets(bounds, address)? {
            let pos = bounds
                .position_at(offset)
                .ok_or_else(|| StoreError::Internal(format!("offset {} out of bounds", offset)))?;
            symbols.push(region.grid.get_cell(pos)?);
        }
        Ok(symbols)
    }

    fn erase_run(region: &mut Region, bounds: &GridBounds, address: Address) -> StoreResult<()> {
        for offset in Self::run_offsets(bounds, address)? {
            let pos = bounds
                .position_at(offset)
                .ok_or_else(|| StoreError::Internal(format!("offset {} out of bounds", offset)))?;
            region.grid.set_cell(pos, Symbol::EMPTY)?;
        }
        Ok(())
    }

    fn run_offsets(bounds: &GridBounds, address: Address) -> StoreResult<std::ops::Range<usize>> {
        address.offsets(bounds).ok_or_else(|| {
            StoreError::Internal(format!(
                "run at {} of {} cells leaves the grid bounds",
                address.start, address.len
            ))
        })
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Number of keys currently stored
    pub entries: usize,
    /// Estimated number of entries the grid can hold
    pub capacity: usize,
    pub used_percent: usize,
    /// Live cache entries
    pub cache_size: usize,
    /// Chunk columns loaded by the grid provider
    pub chunks: usize,
    pub total_cells: usize,
    pub writes: u64,
    pub reads: u64,
    pub deletes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}
