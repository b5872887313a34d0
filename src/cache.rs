//! Bounded in-memory cache for resolved media metadata
//!
//! Resolving a URL shells out to the backend and typically takes seconds,
//! so the runner remembers recent results. The cache is bounded and evicts
//! the least recently used entry, keeping memory flat over long sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::MediaMetadata;

struct CacheEntry {
    value: MediaMetadata,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

/// LRU cache mapping source URLs to resolved metadata.
///
/// All methods take `&self`; interior locking makes the cache safe to share
/// behind an `Arc`.
pub struct ResolveCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ResolveCache {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        ResolveCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Looks up metadata for `url`, refreshing its recency on a hit.
    pub fn get(&self, url: &str) -> Option<MediaMetadata> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(url)?;
        entry.last_used = tick;
        Some(entry.value.clone())
    }

    /// Stores metadata for `url`, evicting the least recently used entry
    /// when the cache is full.
    pub fn insert(&self, url: &str, value: MediaMetadata) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(url) && inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            url.to_string(),
            CacheEntry {
                value,
                last_used: tick,
            },
        );
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries this cache retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
