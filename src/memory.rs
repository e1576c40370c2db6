//! In-memory asset cache with LRU eviction.

use crate::decode::ImageAsset;
use crate::key::CacheKey;
use crate::stats::CacheStats;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

/// Entry in the memory cache.
struct MemoryEntry {
    asset: ImageAsset,
    /// Last access time for LRU eviction
    last_accessed: Instant,
}

impl MemoryEntry {
    fn new(asset: ImageAsset) -> Self {
        Self {
            asset,
            last_accessed: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

struct MemoryInner {
    entries: HashMap<CacheKey, MemoryEntry>,
    total_bytes: usize,
    stats: CacheStats,
}

/// Bounded in-memory cache of decoded assets.
///
/// Enforces both an entry-count limit and a total-cost limit, evicting
/// least-recently-used entries when either bound is exceeded. A single
/// entry larger than the cost limit is allowed to sit in the store alone.
///
/// All bookkeeping sits behind one internal mutex, separate from the
/// fetch-coordination state, so memory hits for unrelated keys never
/// serialize behind in-flight fetches.
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    max_entries: usize,
    max_total_bytes: usize,
}

impl MemoryCache {
    /// Create a new memory cache with the given bounds.
    ///
    /// # Arguments
    ///
    /// * `max_entries` - Maximum number of entries held at once
    /// * `max_total_bytes` - Maximum total decoded size in bytes
    pub fn new(max_entries: usize, max_total_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                total_bytes: 0,
                stats: CacheStats::new(),
            }),
            max_entries,
            max_total_bytes,
        }
    }

    /// Get a cached asset, refreshing its recency on hit.
    pub fn get(&self, key: &CacheKey) -> Option<ImageAsset> {
        let mut inner = self.inner.lock().unwrap();
        let MemoryInner { entries, stats, .. } = &mut *inner;

        if let Some(entry) = entries.get_mut(key) {
            entry.touch();
            stats.record_memory_hit();
            Some(entry.asset.clone())
        } else {
            stats.record_memory_miss();
            None
        }
    }

    /// Insert or replace an asset, evicting LRU entries to stay in bounds.
    pub fn set(&self, key: CacheKey, asset: ImageAsset) {
        let mut inner = self.inner.lock().unwrap();
        let cost = asset.byte_size();

        if let Some(previous) = inner.entries.remove(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(previous.asset.byte_size());
        }

        inner.entries.insert(key, MemoryEntry::new(asset));
        inner.total_bytes += cost;

        self.evict_locked(&mut inner);
    }

    /// Remove a single entry if present.
    pub fn remove(&self, key: &CacheKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.remove(key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.asset.byte_size());
        }
    }

    /// Check if a key exists in the cache.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.entries.contains_key(key)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Empty the store in response to the host's low-memory signal.
    ///
    /// Synchronous and free of I/O, so it is safe to invoke from a
    /// latency-sensitive signal handler.
    pub fn purge(&self) {
        let mut inner = self.inner.lock().unwrap();
        let purged = inner.entries.len();
        inner.entries.clear();
        inner.total_bytes = 0;
        inner.stats.record_pressure_purge();
        info!(purged, "memory cache purged on low-memory signal");
    }

    /// Current number of entries.
    pub fn entry_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.entries.len()
    }

    /// Current total decoded size in bytes.
    pub fn size_bytes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.total_bytes
    }

    /// Maximum number of entries.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Maximum total decoded size in bytes.
    pub fn max_total_bytes(&self) -> usize {
        self.max_total_bytes
    }

    /// Snapshot of the memory tier statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = inner.stats.clone();
        stats.memory_size_bytes = inner.total_bytes;
        stats.memory_entry_count = inner.entries.len();
        stats
    }

    /// Evict least-recently-used entries until both bounds hold.
    ///
    /// Caller must hold the inner lock.
    fn evict_locked(&self, inner: &mut MemoryInner) {
        if inner.entries.len() <= self.max_entries && inner.total_bytes <= self.max_total_bytes {
            return;
        }

        // Collect entries sorted by last access time (oldest first)
        let mut order: Vec<(CacheKey, Instant)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_accessed))
            .collect();
        order.sort_by_key(|(_, accessed)| *accessed);

        let mut evicted = 0u64;
        for (key, _) in order {
            let over_count = inner.entries.len() > self.max_entries;
            // A single entry larger than the cost limit may sit alone.
            let over_bytes = inner.total_bytes > self.max_total_bytes && inner.entries.len() > 1;
            if !over_count && !over_bytes {
                break;
            }

            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.asset.byte_size());
                evicted += 1;
            }
        }

        if evicted > 0 {
            inner.stats.record_memory_eviction(evicted);
            debug!(
                evicted,
                remaining = inner.entries.len(),
                total_bytes = inner.total_bytes,
                "memory cache eviction"
            );
        }
    }
}
