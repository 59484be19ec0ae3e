//! Process-local cache of flow source keyed by flow key.
//!
//! The cache is an explicit component constructed once at startup and
//! injected into the executor. An entry is valid only while its stamp is at
//! least the store's `updated_at` for that flow; staleness is detected
//! lazily at the next execution, never pushed. Replicas of the host each
//! hold their own cache and may transiently diverge, which is fine because
//! every execution re-checks the store's timestamp first.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::types::FlowKey;

/// One cached flow: source text plus the store timestamp it was compiled at
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached source text
    pub source: String,
    /// The flow's `updated_at` at the time of caching
    pub cached_at: DateTime<Utc>,
}

/// Concurrent flow-source cache.
///
/// Distinct keys never contend; readers and writers of one key are kept
/// consistent by the map's sharded locking.
#[derive(Default)]
pub struct FlowCache {
    entries: DashMap<String, CacheEntry>,
}

impl FlowCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached source for `key` if the entry is still valid
    /// against the store's current `updated_at`.
    pub fn lookup(&self, key: &FlowKey, updated_at: DateTime<Utc>) -> Option<String> {
        let entry = self.entries.get(key.as_str())?;
        if entry.cached_at >= updated_at {
            Some(entry.source.clone())
        } else {
            None
        }
    }

    /// Insert or replace the entry for `key`, stamped with the flow's
    /// current `updated_at`. Callers must not store source that failed to
    /// compile; a fixed-and-resaved flow must recompile fresh.
    pub fn store(&self, key: &FlowKey, source: &str, cached_at: DateTime<Utc>) {
        self.entries.insert(
            key.0.clone(),
            CacheEntry {
                source: source.to_string(),
                cached_at,
            },
        );
    }

    /// Drop the entry for one key; returns true if something was evicted
    pub fn evict(&self, key: &FlowKey) -> bool {
        self.entries.remove(key.as_str()).is_some()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the cache holds no entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
