//! Cross-component cache behavior: coalescing, tier promotion, failure
//! handling, pruning.

use imagevault::{
    AssetDecoder, BlobTransport, CacheConfig, CacheKey, DecodeError, FetchError, ImageAsset,
    ImageCache, MemoryPressure, TransportError, Variant,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Transport with a fixed payload, an optional per-call delay, and a
/// scripted number of initial failures. Counts every invocation.
#[derive(Clone)]
struct ScriptedTransport {
    payload: Vec<u8>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    failures_remaining: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            failures_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing_first(self, failures: usize) -> Self {
        self.failures_remaining.store(failures, Ordering::SeqCst);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BlobTransport for ScriptedTransport {
    async fn fetch(&self, _address: &str) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Request("injected failure".to_string()));
        }

        Ok(self.payload.clone())
    }
}

/// Decoder treating the payload as pre-decoded RGBA rows; rejects
/// lengths that do not divide into whole pixels.
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

const ADDRESS: &str = "https://cdn.example.com/img.jpg";

fn new_cache(
    transport: ScriptedTransport,
) -> (ImageCache<ScriptedTransport, RawDecoder>, TempDir) {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new().with_cache_dir(temp.path().to_path_buf());
    let cache = ImageCache::new(config, transport, RawDecoder).unwrap();
    (cache, temp)
}

#[tokio::test]
async fn concurrent_loads_for_one_key_share_a_single_fetch() {
    let transport =
        ScriptedTransport::new(vec![0u8; 64]).with_delay(Duration::from_millis(200));
    let (cache, _temp) = new_cache(transport.clone());

    let started = Instant::now();
    let results = futures::future::join_all(
        (0..5).map(|_| cache.load(ADDRESS, Variant::Full)),
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(transport.call_count(), 1, "all five loads should coalesce");
    for result in results {
        assert_eq!(result.unwrap().byte_size(), 64);
    }
    assert!(
        elapsed < Duration::from_millis(600),
        "coalesced loads took {:?}, expected roughly one fetch latency",
        elapsed
    );
}

#[tokio::test]
async fn second_load_hits_memory_without_fetching() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let (cache, _temp) = new_cache(transport.clone());

    cache.load(ADDRESS, Variant::Full).await.unwrap();
    cache.load(ADDRESS, Variant::Full).await.unwrap();

    assert_eq!(transport.call_count(), 1);
    assert!(cache.stats().memory_hits >= 1);
}

#[tokio::test]
async fn disk_hit_repopulates_memory_without_fetching() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let (cache, _temp) = new_cache(transport.clone());

    cache.load(ADDRESS, Variant::Full).await.unwrap();
    // Let the fire-and-forget disk write land
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Empty the memory tier only; the disk record must satisfy the next load
    cache.on_memory_pressure();
    assert_eq!(cache.stats().memory_entry_count, 0);

    cache.load(ADDRESS, Variant::Full).await.unwrap();

    assert_eq!(transport.call_count(), 1, "disk hit should not re-fetch");
    let stats = cache.stats();
    assert!(stats.disk_hits >= 1);
    assert_eq!(stats.memory_entry_count, 1, "disk hit should repopulate memory");
}

#[tokio::test]
async fn pressure_signal_empties_memory_tier() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new().with_cache_dir(temp.path().to_path_buf());
    let signal = MemoryPressure::new();
    let cache =
        ImageCache::with_pressure_signal(config, transport.clone(), RawDecoder, &signal).unwrap();

    cache.load(ADDRESS, Variant::Full).await.unwrap();
    assert_eq!(cache.stats().memory_entry_count, 1);

    signal.signal();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = cache.stats();
    assert_eq!(stats.memory_entry_count, 0);
    assert_eq!(stats.pressure_purges, 1);
}

#[tokio::test]
async fn failed_fetches_are_not_cached() {
    let transport = ScriptedTransport::new(vec![0u8; 64]).failing_first(1);
    let (cache, _temp) = new_cache(transport.clone());

    let first = cache.load(ADDRESS, Variant::Full).await;
    assert!(matches!(first, Err(FetchError::Transport(_))));

    // The transport works now; the cache must retry rather than replay
    // the remembered failure.
    let second = cache.load(ADDRESS, Variant::Full).await;
    assert!(second.is_ok());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn corrupt_disk_record_degrades_to_fresh_fetch() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let temp = TempDir::new().unwrap();

    // Seed a record whose bytes cannot decode
    let key = CacheKey::new(ADDRESS, Variant::Full);
    let path = key.storage_path(temp.path());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, [1, 2, 3]).unwrap();

    let config = CacheConfig::new().with_cache_dir(temp.path().to_path_buf());
    let cache = ImageCache::new(config, transport.clone(), RawDecoder).unwrap();

    let asset = cache.load(ADDRESS, Variant::Full).await.unwrap();

    assert_eq!(asset.byte_size(), 64);
    assert_eq!(transport.call_count(), 1, "bad record should trigger a fetch");
}

#[tokio::test]
async fn prune_stale_removes_only_old_records() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let (cache, _temp) = new_cache(transport.clone());
    let old_address = "https://cdn.example.com/old.jpg";
    let fresh_address = "https://cdn.example.com/fresh.jpg";

    cache.load(old_address, Variant::Full).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    cache.load(fresh_address, Variant::Full).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let removed = cache.prune_stale(Duration::from_millis(250)).await;
    assert_eq!(removed, 1);

    // Fresh record still serves from disk; the pruned one re-fetches
    cache.on_memory_pressure();
    cache.load(fresh_address, Variant::Full).await.unwrap();
    assert_eq!(transport.call_count(), 2);
    cache.load(old_address, Variant::Full).await.unwrap();
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn clear_all_is_idempotent_and_forgets_both_tiers() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let (cache, _temp) = new_cache(transport.clone());

    cache.load(ADDRESS, Variant::Full).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    cache.clear_all().await;
    cache.clear_all().await;

    assert_eq!(cache.stats().memory_entry_count, 0);

    cache.load(ADDRESS, Variant::Full).await.unwrap();
    assert_eq!(transport.call_count(), 2, "cleared key should re-fetch");
}

#[tokio::test]
async fn variants_are_cached_independently() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let (cache, _temp) = new_cache(transport.clone());

    cache.load(ADDRESS, Variant::Full).await.unwrap();
    cache.load(ADDRESS, Variant::Thumbnail).await.unwrap();

    assert_eq!(
        transport.call_count(),
        2,
        "full and thumbnail variants are distinct keys"
    );
    assert_eq!(cache.stats().memory_entry_count, 2);
}

#[tokio::test]
async fn abandoned_owner_unblocks_waiters() {
    let transport =
        ScriptedTransport::new(vec![0u8; 64]).with_delay(Duration::from_millis(300));
    let (cache, _temp) = new_cache(transport.clone());

    let owner_cache = cache.clone();
    let owner = tokio::spawn(async move { owner_cache.load(ADDRESS, Variant::Full).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiter_cache = cache.clone();
    let waiter = tokio::spawn(async move { waiter_cache.load(ADDRESS, Variant::Full).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Drop the owning load mid-fetch
    owner.abort();

    let result = waiter.await.unwrap();
    assert_eq!(result, Err(FetchError::Interrupted));

    // A later load starts a fresh fetch and succeeds
    let asset = cache.load(ADDRESS, Variant::Full).await.unwrap();
    assert_eq!(asset.byte_size(), 64);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn preload_fills_the_cache_and_swallows_errors() {
    let transport = ScriptedTransport::new(vec![0u8; 64]);
    let (cache, _temp) = new_cache(transport.clone());

    cache.preload(
        [
            "https://cdn.example.com/a.jpg",
            "https://cdn.example.com/b.jpg",
            "https://cdn.example.com/c.jpg",
        ],
        Variant::Thumbnail,
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(transport.call_count(), 3);

    // Preloaded addresses now serve from memory
    cache
        .load("https://cdn.example.com/b.jpg", Variant::Thumbnail)
        .await
        .unwrap();
    assert_eq!(transport.call_count(), 3);

    // A failing preload neither panics nor poisons later loads
    let failing = ScriptedTransport::new(vec![0u8; 64]).failing_first(1);
    let (cache, _temp) = new_cache(failing.clone());
    cache.preload(["https://cdn.example.com/x.jpg"], Variant::Full);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let asset = cache
        .load("https://cdn.example.com/x.jpg", Variant::Full)
        .await
        .unwrap();
    assert_eq!(asset.byte_size(), 64);
}
