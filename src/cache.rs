//! Two-tier cache facade with request coalescing.
//!
//! [`ImageCache`] is the only entry point collaborators use. A load
//! walks the tiers in order and falls back to a coalesced fetch:
//!
//! ```text
//! load(address, variant)
//!   │
//!   ├─► MemoryCache ── hit ──► return asset
//!   │
//!   ├─► DiskCache ──── hit ──► decode, populate memory, return
//!   │
//!   └─► FetchCoalescer ─ miss ─► one fetch per key
//!            │                     │
//!            │                 transport + decoder
//!            │                     │
//!            ▼                     ▼
//!       [waiters attach]   [populate memory,
//!                           persist to disk async,
//!                           broadcast result]
//! ```
//!
//! The facade is explicitly constructed and cheaply clonable; hosts that
//! want a process-wide instance hold one themselves rather than the type
//! providing a global. Background tasks (janitor, pressure listener)
//! stop when the last clone is dropped.

use crate::coalesce::{FetchCoalescer, Registration};
use crate::config::CacheConfig;
use crate::decode::{AssetDecoder, ImageAsset};
use crate::disk::DiskCache;
use crate::error::{CacheError, FetchError};
use crate::janitor;
use crate::key::{CacheKey, Variant};
use crate::memory::MemoryCache;
use crate::pressure::{self, MemoryPressure};
use crate::stats::CacheStats;
use crate::transport::BlobTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Two-tier asset cache with fetch coalescing.
///
/// Generic over the injected [`BlobTransport`] and [`AssetDecoder`].
/// Clones share all state; background tasks require a Tokio runtime and
/// are torn down when the last clone drops.
pub struct ImageCache<T, D> {
    inner: Arc<CacheInner<T, D>>,
}

impl<T, D> Clone for ImageCache<T, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<T, D> {
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
    coalescer: FetchCoalescer,
    transport: T,
    decoder: D,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    /// Cancels background tasks when the last facade clone drops.
    #[allow(dead_code)]
    tasks: TaskGuard,
}

struct TaskGuard {
    token: CancellationToken,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Removes the in-flight entry if the owning load is dropped mid-fetch,
/// so attached waiters fail fast instead of waiting forever.
struct CompletionGuard<'a> {
    coalescer: &'a FetchCoalescer,
    key: &'a CacheKey,
    armed: bool,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coalescer.abandon(self.key);
        }
    }
}

impl<T, D> ImageCache<T, D>
where
    T: BlobTransport + 'static,
    D: AssetDecoder + 'static,
{
    /// Create a cache from `config` with the given collaborators.
    ///
    /// Creates the disk directory and, when configured, starts the
    /// background janitor.
    pub fn new(config: CacheConfig, transport: T, decoder: D) -> Result<Self, CacheError> {
        Self::build(config, transport, decoder, None)
    }

    /// Create a cache subscribed to the host's low-memory signal.
    ///
    /// Every [`MemoryPressure::signal`] empties the memory tier. The
    /// subscription ends when the last cache clone drops; the signal
    /// source and the cache may otherwise outlive each other freely.
    pub fn with_pressure_signal(
        config: CacheConfig,
        transport: T,
        decoder: D,
        signal: &MemoryPressure,
    ) -> Result<Self, CacheError> {
        Self::build(config, transport, decoder, Some(signal))
    }

    fn build(
        config: CacheConfig,
        transport: T,
        decoder: D,
        signal: Option<&MemoryPressure>,
    ) -> Result<Self, CacheError> {
        if config.memory.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "memory entry limit must be at least 1".to_string(),
            ));
        }

        let memory = Arc::new(MemoryCache::new(
            config.memory.max_entries,
            config.memory.max_total_bytes,
        ));
        let disk = Arc::new(DiskCache::new(config.disk.cache_dir.clone())?);

        let token = CancellationToken::new();

        if let Some(interval) = config.disk.janitor_interval {
            janitor::spawn_janitor(
                Arc::clone(&disk),
                interval,
                config.disk.max_age,
                token.child_token(),
            );
        }

        if let Some(signal) = signal {
            pressure::spawn_listener(Arc::clone(&memory), signal, token.child_token());
        }

        Ok(Self {
            inner: Arc::new(CacheInner {
                memory,
                disk,
                coalescer: FetchCoalescer::new(),
                transport,
                decoder,
                fetches: AtomicU64::new(0),
                fetch_failures: AtomicU64::new(0),
                tasks: TaskGuard { token },
            }),
        })
    }

    /// Load the asset for `address` in the requested variant.
    ///
    /// Checks memory, then disk, then performs a coalesced fetch:
    /// concurrent loads for the same key share one fetch and observe the
    /// same result. Failures are surfaced but never cached - a
    /// subsequent call retries.
    pub async fn load(&self, address: &str, variant: Variant) -> Result<ImageAsset, FetchError> {
        let key = CacheKey::new(address, variant);

        if let Some(asset) = self.inner.memory.get(&key) {
            trace!(address = address, variant = ?variant, "memory hit");
            return Ok(asset);
        }

        if let Some(bytes) = self.inner.disk.read(&key).await {
            match self.inner.decoder.decode(&bytes, variant) {
                Ok(asset) => {
                    trace!(address = address, variant = ?variant, "disk hit");
                    self.inner.memory.set(key, asset.clone());
                    return Ok(asset);
                }
                Err(err) => {
                    // A corrupt record must not poison future loads:
                    // discard it and fall through to a fresh fetch.
                    warn!(
                        address = address,
                        error = %err,
                        "corrupt disk record, discarding"
                    );
                    let disk = Arc::clone(&self.inner.disk);
                    let stale = key.clone();
                    tokio::spawn(async move { disk.remove(&stale).await });
                }
            }
        }

        match self.inner.coalescer.register(key.clone()) {
            Registration::Waiter(mut rx) => rx
                .recv()
                .await
                .unwrap_or(Err(FetchError::Interrupted)),
            Registration::Owner => {
                let mut guard = CompletionGuard {
                    coalescer: &self.inner.coalescer,
                    key: &key,
                    armed: true,
                };

                let result = self.fetch_and_store(&key).await;

                guard.armed = false;
                drop(guard);
                self.inner.coalescer.complete(&key, result.clone());
                result
            }
        }
    }

    /// Fire-and-forget best-effort loads for a batch of addresses.
    ///
    /// Each address is loaded independently; one failure does not affect
    /// the others. Errors are logged at debug level and swallowed.
    pub fn preload<I, S>(&self, addresses: I, variant: Variant)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for address in addresses {
            let cache = self.clone();
            let address = address.into();
            tokio::spawn(async move {
                if let Err(err) = cache.load(&address, variant).await {
                    debug!(address = address.as_str(), error = %err, "preload failed");
                }
            });
        }
    }

    /// Remove an asset from both tiers.
    pub async fn evict(&self, address: &str, variant: Variant) {
        let key = CacheKey::new(address, variant);
        self.inner.memory.remove(&key);
        self.inner.disk.remove(&key).await;
    }

    /// Empty both tiers. Idempotent; never surfaces an error.
    pub async fn clear_all(&self) {
        self.inner.memory.clear();
        self.inner.disk.clear().await;
    }

    /// Delete disk records older than `older_than`.
    ///
    /// Periodic housekeeping, never invoked by loads. Returns the number
    /// of records removed.
    pub async fn prune_stale(&self, older_than: Duration) -> usize {
        self.inner.disk.prune(older_than).await
    }

    /// Empty the memory tier in response to host memory pressure.
    ///
    /// Synchronous and free of I/O. Caches built with
    /// [`with_pressure_signal`](Self::with_pressure_signal) invoke this
    /// automatically on each signal.
    pub fn on_memory_pressure(&self) {
        self.inner.memory.purge();
    }

    /// Merged statistics across both tiers and the fetch path.
    pub fn stats(&self) -> CacheStats {
        let memory = self.inner.memory.stats();
        let disk = self.inner.disk.stats();
        let coalescer = self.inner.coalescer.stats();

        CacheStats {
            memory_hits: memory.memory_hits,
            memory_misses: memory.memory_misses,
            memory_size_bytes: memory.memory_size_bytes,
            memory_entry_count: memory.memory_entry_count,
            memory_evictions: memory.memory_evictions,
            pressure_purges: memory.pressure_purges,
            disk_hits: disk.disk_hits,
            disk_misses: disk.disk_misses,
            disk_writes: disk.disk_writes,
            disk_write_failures: disk.disk_write_failures,
            disk_pruned: disk.disk_pruned,
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            fetch_failures: self.inner.fetch_failures.load(Ordering::Relaxed),
            coalesced_waits: coalescer.coalesced_requests,
        }
    }

    /// Run the owner side of a coalesced fetch: transport, decode, then
    /// populate memory synchronously and disk off the critical path.
    async fn fetch_and_store(&self, key: &CacheKey) -> Result<ImageAsset, FetchError> {
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(address = key.address(), variant = ?key.variant(), "fetching asset");

        let bytes = match self.inner.transport.fetch(key.address()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.inner.fetch_failures.fetch_add(1, Ordering::Relaxed);
                return Err(err.into());
            }
        };

        let asset = match self.inner.decoder.decode(&bytes, key.variant()) {
            Ok(asset) => asset,
            Err(err) => {
                self.inner.fetch_failures.fetch_add(1, Ordering::Relaxed);
                return Err(err.into());
            }
        };

        self.inner.memory.set(key.clone(), asset.clone());

        // Persist the encoded bytes without holding up the caller.
        let disk = Arc::clone(&self.inner.disk);
        let persist_key = key.clone();
        tokio::spawn(async move {
            disk.write(&persist_key, &bytes).await;
        });

        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::{DecodeError, TransportError};
    use crate::transport::tests::MockTransport;
    use tempfile::TempDir;

    /// Decoder treating the payload as pre-decoded RGBA rows.
    struct RawDecoder;

    impl AssetDecoder for RawDecoder {
        fn decode(&self, bytes: &[u8], _variant: Variant) -> Result<ImageAsset, DecodeError> {
            if bytes.is_empty() || bytes.len() % 4 != 0 {
                return Err(DecodeError::Malformed("truncated pixel data".to_string()));
            }
            Ok(ImageAsset::from_rgba8(
                (bytes.len() / 4) as u32,
                1,
                bytes.to_vec(),
            ))
        }
    }

    fn test_config(temp: &TempDir) -> CacheConfig {
        CacheConfig::new().with_cache_dir(temp.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_rejects_zero_entry_limit() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp).with_max_entries(0);
        let transport = MockTransport {
            response: Ok(vec![0u8; 16]),
        };

        let result = ImageCache::new(config, transport, RawDecoder);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_load_returns_decoded_asset() {
        let temp = TempDir::new().unwrap();
        let transport = MockTransport {
            response: Ok(vec![0u8; 64]),
        };
        let cache = ImageCache::new(test_config(&temp), transport, RawDecoder).unwrap();

        let asset = cache
            .load("https://cdn.example.com/a.png", Variant::Full)
            .await
            .unwrap();

        assert_eq!(asset.byte_size(), 64);
        assert_eq!(cache.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_load_surfaces_transport_error() {
        let temp = TempDir::new().unwrap();
        let transport = MockTransport {
            response: Err(TransportError::Request("offline".to_string())),
        };
        let cache = ImageCache::new(test_config(&temp), transport, RawDecoder).unwrap();

        let result = cache
            .load("https://cdn.example.com/a.png", Variant::Full)
            .await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
        assert_eq!(cache.stats().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_load_surfaces_decode_error() {
        let temp = TempDir::new().unwrap();
        let transport = MockTransport {
            response: Ok(vec![1, 2, 3]),
        };
        let cache = ImageCache::new(test_config(&temp), transport, RawDecoder).unwrap();

        let result = cache
            .load("https://cdn.example.com/a.png", Variant::Full)
            .await;

        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let temp = TempDir::new().unwrap();
        let transport = MockTransport {
            response: Ok(vec![0u8; 16]),
        };
        let cache = ImageCache::new(test_config(&temp), transport, RawDecoder).unwrap();
        let clone = cache.clone();

        cache
            .load("https://cdn.example.com/a.png", Variant::Full)
            .await
            .unwrap();

        // The clone sees the memory entry the original populated
        assert_eq!(clone.stats().memory_entry_count, 1);
        clone
            .load("https://cdn.example.com/a.png", Variant::Full)
            .await
            .unwrap();
        assert_eq!(clone.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_evict_removes_from_both_tiers() {
        let temp = TempDir::new().unwrap();
        let transport = MockTransport {
            response: Ok(vec![0u8; 16]),
        };
        let cache = ImageCache::new(test_config(&temp), transport, RawDecoder).unwrap();
        let address = "https://cdn.example.com/a.png";

        cache.load(address, Variant::Full).await.unwrap();
        // Let the fire-and-forget disk write land
        tokio::time::sleep(Duration::from_millis(100)).await;

        cache.evict(address, Variant::Full).await;

        assert_eq!(cache.stats().memory_entry_count, 0);
        cache.load(address, Variant::Full).await.unwrap();
        assert_eq!(cache.stats().fetches, 2, "evicted key should re-fetch");
    }
}
