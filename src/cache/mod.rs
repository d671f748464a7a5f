//! Cache store interface and the built-in in-memory implementation.
//!
//! The cache is strictly an optimization: every caller must produce the same
//! answer with caching disabled, so [`with_cache`] treats unreadable entries
//! and storage hiccups as misses, never as failures.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::Result;

/// Byte-oriented cache storage. Implementations must tolerate concurrent
/// readers and writers; keys are idempotent, so a lost race only means
/// redundant work.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
}

/// Joins key parts with the cache key separator.
pub fn cache_key(parts: &[String]) -> String {
    parts.join("_")
}

/// Runs `compute` behind the cache.
///
/// Key is derived from `key_parts`. On a readable hit the stored payload is
/// returned and `compute` never runs. On a miss, a bypass, or an unreadable
/// hit, `compute` runs and its successful result is stored under the same
/// key, bypass included: a forced refresh still warms the cache for the next
/// caller.
pub fn with_cache<T, F>(
    store: &dyn CacheStore,
    key_parts: &[String],
    ttl: Duration,
    bypass: bool,
    compute: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    let key = cache_key(key_parts);

    if !bypass {
        if let Some(bytes) = store.get(&key) {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    debug!("cache hit for `{}`", key);
                    return Ok(value);
                }
                Err(err) => {
                    warn!("discarding unreadable cache entry `{}`: {}", key, err);
                }
            }
        }
    }

    let value = compute()?;
    match serde_json::to_vec(&value) {
        Ok(bytes) => store.set(&key, bytes, ttl),
        Err(err) => warn!("result for `{}` is not cacheable: {}", key, err),
    }
    Ok(value)
}

struct CacheSlot {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// Process-local cache store with per-entry TTLs and a bounded footprint.
/// Readers evict the stale entry they find; writes landing on a full cache
/// sweep out expired entries, then drop the entry closest to expiry.
pub struct MemoryCache {
    slots: DashMap<String, CacheSlot>,
    max_entries: usize,
}

impl MemoryCache {
    /// Cap on resident entries before writes start evicting.
    pub const DEFAULT_MAX_ENTRIES: usize = 1_024;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            slots: DashMap::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = match self.slots.get(key) {
            Some(slot) => {
                if Instant::now() < slot.expires_at {
                    return Some(slot.payload.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.slots.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if self.slots.len() >= self.max_entries {
            let now = Instant::now();
            self.slots.retain(|_, slot| now < slot.expires_at);
        }
        if self.slots.len() >= self.max_entries {
            if let Some(oldest) = self
                .slots
                .iter()
                .min_by_key(|slot| slot.value().expires_at)
                .map(|slot| slot.key().clone())
            {
                self.slots.remove(&oldest);
            }
        }
        self.slots.insert(
            key.to_string(),
            CacheSlot {
                payload: value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// Cache that stores nothing. Used to run reports with caching disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheStore for NoopCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) {}
}
