//! Bounded, time-expiring memo of payload decoding results.
//!
//! ```text
//! PayloadIdCache
//!     └── Mutex<Inner>
//!           ├── entries: HashMap<payload bytes, Entry { value, expires_at, tick }>
//!           └── recency: BTreeMap<tick, payload bytes>   // oldest tick = LRU
//! ```
//!
//! Every access takes the single lock, so the scan callback path and the
//! engine never observe a half-updated entry. Expiry is an absolute deadline
//! fixed at insertion; reads do not extend it.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::decode_hello;
use crate::errors::ProximityError;
use crate::types::DecodedHello;

/// Default maximum number of cached payloads.
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Default entry lifetime (one epoch).
pub const DEFAULT_CACHE_TTL_S: u64 = 900;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_ttl_s")]
    pub ttl_s: u64,
}

const fn default_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

const fn default_ttl_s() -> u64 {
    DEFAULT_CACHE_TTL_S
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CACHE_CAPACITY, ttl_s: DEFAULT_CACHE_TTL_S }
    }
}

#[derive(Debug)]
struct Entry {
    value: DecodedHello,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
    tick: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Vec<u8>, Entry>,
    recency: BTreeMap<u64, Vec<u8>>,
    next_tick: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn touch(&mut self, key: &[u8]) {
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_vec());
        }
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        self.entries.remove(&key);
        trace!(key_len = key.len(), "evicted least-recently-used payload");
        true
    }
}

#[derive(Debug)]
pub struct PayloadIdCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl PayloadIdCache {
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_s))
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<DecodedHello> {
        self.get_at(key, Instant::now())
    }

    /// Cached value unless expired at `now`; an expired entry is removed.
    #[must_use]
    pub fn get_at(&self, key: &[u8], now: Instant) -> Option<DecodedHello> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        if entry.is_expired(now) {
            inner.remove(key);
            trace!("payload cache entry expired");
            return None;
        }
        let value = entry.value;
        inner.touch(key);
        Some(value)
    }

    pub fn put(&self, key: &[u8], value: DecodedHello) {
        self.put_at(key, value, Instant::now());
    }

    /// Insert or overwrite, evicting the least-recently-used entry when full.
    pub fn put_at(&self, key: &[u8], value: DecodedHello, now: Instant) {
        let mut inner = self.inner.lock();
        inner.remove(key);
        while inner.entries.len() >= self.capacity {
            if !inner.evict_lru() {
                break;
            }
        }
        let tick = inner.bump();
        inner.entries.insert(
            key.to_vec(),
            Entry { value, expires_at: now.checked_add(self.ttl), tick },
        );
        inner.recency.insert(tick, key.to_vec());
    }

    /// Batch-evict everything expired at `now`. Returns the number evicted.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<Vec<u8>> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Decode through the cache. Failures are not cached.
    ///
    /// # Errors
    ///
    /// Returns `ProximityError::InvalidLength` for malformed payloads.
    pub fn get_or_decode(&self, payload: &[u8]) -> Result<DecodedHello, ProximityError> {
        self.get_or_decode_at(payload, Instant::now())
    }

    /// # Errors
    ///
    /// Returns `ProximityError::InvalidLength` for malformed payloads.
    pub fn get_or_decode_at(
        &self,
        payload: &[u8],
        now: Instant,
    ) -> Result<DecodedHello, ProximityError> {
        if let Some(hit) = self.get_at(payload, now) {
            return Ok(hit);
        }
        let decoded = decode_hello(payload)?;
        self.put_at(payload, decoded, now);
        Ok(decoded)
    }
}

impl Default for PayloadIdCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
