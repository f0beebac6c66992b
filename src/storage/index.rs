//! Key Index and Value Cache
//!
//! The index maps every live key to the grid [`Address`] of its run. The
//! cache keeps recently written or read values in memory so repeated reads
//! skip the grid entirely.
//!
//! ## Cache Policy
//!
//! - **Lazy TTL**: an entry older than the TTL is treated as absent and is
//!   removed the moment someone looks at it.
//! - **Insertion-order eviction**: when the cache is full, inserting a new
//!   key evicts the single entry with the oldest insertion time. Reads do not
//!   refresh an entry's position; only `put` does.
//!
//! ```text
//!   order (oldest → newest):  k3  k1  k7  k2
//!   put(k9) at capacity  ──>  k1  k7  k2  k9     (k3 evicted)
//! ```

use super::allocator::Address;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Maps keys to grid addresses.
///
/// Many readers may look up entries concurrently; a writer replaces one entry
/// at a time, so readers never see a half-written address.
#[derive(Debug, Default)]
pub struct KeyIndex {
    entries: RwLock<HashMap<String, Address>>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the address for `key`, returning the old one.
    pub fn put(&self, key: impl Into<String>, address: Address) -> Option<Address> {
        self.entries.write().insert(key.into(), address)
    }

    pub fn get(&self, key: &str) -> Option<Address> {
        self.entries.read().get(key).copied()
    }

    pub fn remove(&self, key: &str) -> Option<Address> {
        self.entries.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Returns all keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    inserted_at: Instant,
    /// Position in insertion order
    seq: u64,
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order: seq -> key
    order: BTreeMap<u64, String>,
    next_seq: u64,
    capacity: usize,
    ttl: Duration,
}

impl CacheInner {
    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > self.ttl
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Size-bounded, time-expiring read cache.
///
/// All mutation, including lazy expiry and eviction, happens under one lock.
#[derive(Debug)]
pub struct ValueCache {
    inner: Mutex<CacheInner>,
}

impl ValueCache {
    /// Creates a cache holding at most `capacity` values for `ttl` each.
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                capacity,
                ttl,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let expired = inner.is_expired(inner.entries.get(key)?, now);
        if expired {
            inner.remove(key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&self, key: &str, value: Bytes) {
        self.put_at(key, value, Instant::now());
    }

    pub(crate) fn put_at(&self, key: &str, value: Bytes, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.capacity == 0 {
            return;
        }

        // Refreshing an existing key moves it to the newest position
        if inner.remove(key).is_none() && inner.entries.len() >= inner.capacity {
            inner.evict_oldest();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                seq,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of physically present entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| inner.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Applies a new capacity and TTL, evicting the oldest entries if the
    /// cache is now over capacity.
    pub fn reconfigure(&self, capacity: usize, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.ttl = ttl;
        while inner.entries.len() > capacity {
            inner.evict_oldest();
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn ttl(&self) -> Duration {
        self.inner.lock().ttl
    }
}
