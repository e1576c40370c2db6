//! On-disk asset cache with age-based pruning.
//!
//! One file per key, no manifest: presence of a file is the sole source
//! of truth and the filesystem modification time is the age signal. Disk
//! caching is an optimization, so every runtime failure here degrades —
//! reads to a miss, writes to skipped persistence — instead of surfacing
//! to callers.

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::stats::CacheStats;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::task;
use tracing::{debug, warn};

/// Persistent second-tier store for raw asset bytes.
///
/// Owns its cache directory exclusively; no other component touches the
/// subtree.
pub struct DiskCache {
    cache_dir: PathBuf,
    stats: Mutex<CacheStats>,
}

impl DiskCache {
    /// Create a new disk cache rooted at `cache_dir`.
    ///
    /// Creates the directory if it does not exist. This is the only disk
    /// operation whose failure surfaces to the caller; everything after
    /// construction degrades silently.
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            cache_dir,
            stats: Mutex::new(CacheStats::new()),
        })
    }

    /// The directory owning this cache's records.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Read the stored bytes for a key.
    ///
    /// Returns `None` when absent or unreadable; I/O errors are logged
    /// and treated as a miss.
    pub async fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = key.storage_path(&self.cache_dir);

        match tokio::fs::read(&path).await {
            Ok(data) => {
                self.stats.lock().unwrap().record_disk_hit();
                Some(data)
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "disk read failed, treating as miss"
                    );
                }
                self.stats.lock().unwrap().record_disk_miss();
                None
            }
        }
    }

    /// Best-effort write of a key's bytes.
    ///
    /// Failures are logged and swallowed; the caller already holds the
    /// bytes, so a missed write only costs a future re-fetch.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) {
        let path = key.storage_path(&self.cache_dir);

        match write_record(&path, bytes).await {
            Ok(()) => {
                self.stats.lock().unwrap().record_disk_write();
                debug!(path = %path.display(), bytes = bytes.len(), "persisted asset bytes");
            }
            Err(err) => {
                self.stats.lock().unwrap().record_disk_write_failure();
                warn!(
                    path = %path.display(),
                    error = %err,
                    "disk write failed, skipping persistence"
                );
            }
        }
    }

    /// Remove a single record if present.
    pub async fn remove(&self, key: &CacheKey) {
        let path = key.storage_path(&self.cache_dir);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed disk record"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "disk remove failed"),
        }
    }

    /// Delete all records older than `older_than`.
    ///
    /// Age is the file modification time. Returns the number of records
    /// removed; unreadable entries are skipped.
    pub async fn prune(&self, older_than: Duration) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(older_than) else {
            return 0;
        };

        let dir = self.cache_dir.clone();
        let removed = task::spawn_blocking(move || prune_dir(&dir, cutoff))
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "prune task failed");
                0
            });

        if removed > 0 {
            self.stats.lock().unwrap().record_disk_pruned(removed as u64);
            debug!(removed, "pruned stale disk records");
        }
        removed
    }

    /// Delete the entire backing directory and recreate it empty.
    ///
    /// Idempotent; failures are logged and swallowed.
    pub async fn clear(&self) {
        let dir = self.cache_dir.clone();

        let result = task::spawn_blocking(move || {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            std::fs::create_dir_all(&dir)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(dir = %self.cache_dir.display(), "disk cache cleared"),
            Ok(Err(err)) => {
                warn!(dir = %self.cache_dir.display(), error = %err, "disk clear failed")
            }
            Err(err) => warn!(error = %err, "disk clear task failed"),
        }
    }

    /// Snapshot of the disk tier statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }
}

async fn write_record(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// Recursively delete files under `dir` whose mtime is before `cutoff`.
fn prune_dir(dir: &Path, cutoff: SystemTime) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            removed += prune_dir(&path, cutoff);
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };

        if modified < cutoff && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}
