//! TTL cache for pinned and fetched content
//!
//! The cache is an explicit object owned by a [`ContentClient`](super::ContentClient)
//! and shared between concurrent requests through an `Arc`. Entries are
//! independent of each other; only map-level synchronisation is provided.
//! Expiry is driven by an injected [`Clock`] so tests can move time forward.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

/// Fixed lifetime of a cache entry
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Time source for TTL checks
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A document held by the content store
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub cid: String,
    pub payload: Bytes,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: ContentRecord,
    inserted_at: DateTime<Utc>,
}

/// Snapshot of the cache for diagnostics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Cache key for a pin request
pub fn pin_key(filename: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload);
    format!("pin:{}", hex::encode(hasher.finalize()))
}

/// Cache key for a fetch by CID
pub fn cid_key(cid: &str) -> String {
    format!("cid:{cid}")
}

/// Process-local TTL map from cache key to content record
#[derive(Debug)]
pub struct ContentCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current time according to the cache's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match (now - entry.inserted_at).to_std() {
            Ok(age) => age >= self.ttl,
            // inserted "in the future" means the clock went backwards
            Err(_) => false,
        }
    }

    /// Look up a live entry; an expired entry is evicted and reported as a miss
    pub fn get(&self, key: &str) -> Option<ContentRecord> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(entry) if !self.is_expired(entry, now) => return Some(entry.record.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries
            .get(key)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(key);
            debug!(key, "Evicted expired cache entry");
        }
        None
    }

    pub fn insert(&self, key: String, record: ContentRecord) {
        let entry = CacheEntry {
            record,
            inserted_at: self.clock.now(),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Size and sorted keys of the live entries
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| !self.is_expired(entry, now));

        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: keys.len(),
            keys,
        }
    }
}
