//! Configuration types for the cache tiers.

use std::path::PathBuf;
use std::time::Duration;

/// Default memory tier entry limit.
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 100;

/// Default memory tier cost limit (150 MiB).
pub const DEFAULT_MEMORY_MAX_BYTES: usize = 150 * 1024 * 1024;

/// Default disk record retention age (7 days).
pub const DEFAULT_DISK_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Memory tier configuration.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries held at once.
    pub max_entries: usize,
    /// Maximum total decoded size in bytes.
    pub max_total_bytes: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            max_total_bytes: DEFAULT_MEMORY_MAX_BYTES,
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Directory owning the cache records. Created on construction.
    pub cache_dir: PathBuf,
    /// Records older than this are removed by housekeeping.
    pub max_age: Duration,
    /// Interval for the background prune task. `None` (the default)
    /// leaves housekeeping to explicit `prune_stale` calls.
    pub janitor_interval: Option<Duration>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imagevault");

        Self {
            cache_dir,
            max_age: DEFAULT_DISK_MAX_AGE,
            janitor_interval: None,
        }
    }
}

/// Complete cache configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Memory tier configuration.
    pub memory: MemoryCacheConfig,
    /// Disk tier configuration.
    pub disk: DiskCacheConfig,
}

impl CacheConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory tier entry limit.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.memory.max_entries = max_entries;
        self
    }

    /// Set the memory tier cost limit in bytes.
    pub fn with_memory_bytes(mut self, max_total_bytes: usize) -> Self {
        self.memory.max_total_bytes = max_total_bytes;
        self
    }

    /// Set the disk cache directory.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.disk.cache_dir = dir;
        self
    }

    /// Set the disk record retention age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.disk.max_age = max_age;
        self
    }

    /// Enable the background prune task at the given interval.
    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.disk.janitor_interval = Some(interval);
        self
    }
}
