//! Fetch coalescing: at most one outstanding fetch per cache key.
//!
//! When several callers miss both tiers for the same key at once, only
//! one fetch runs - everyone else attaches to it and receives the same
//! result, success or failure.
//!
//! ```text
//! load(key) A ─┐
//!              │                           one
//! load(key) B ─┼──► FetchCoalescer ──────► fetch
//!              │        │                    │
//! load(key) C ─┘        │                    │
//!                       ▼                    ▼
//!                 [A, B, C all         [entry removed,
//!                  receive the          then result
//!                  same result]◄────────broadcast]
//! ```
//!
//! The in-flight table is the single exclusion domain for coalescing.
//! `DashMap`'s entry API makes check-or-create atomic, so concurrent
//! registrations for one key can never both become the owner. Results
//! are never cached here: the entry is removed the instant the fetch
//! resolves, before any caller observes the result, so the next request
//! for the same key starts fresh.

use crate::decode::ImageAsset;
use crate::error::FetchError;
use crate::key::CacheKey;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use dashmap::DashMap;

type FetchResult = Result<ImageAsset, FetchError>;

/// Outcome of registering a request with the coalescer.
pub enum Registration {
    /// First caller for this key: run the fetch and call
    /// [`FetchCoalescer::complete`] with the outcome.
    Owner,
    /// Another fetch is already in flight: await the broadcast result.
    /// A closed channel means the owner abandoned the fetch.
    Waiter(broadcast::Receiver<FetchResult>),
}

impl Registration {
    /// Returns true if this registration owns the fetch.
    pub fn is_owner(&self) -> bool {
        matches!(self, Registration::Owner)
    }
}

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone)]
pub struct CoalescerStats {
    /// Total requests registered
    pub total_requests: u64,
    /// Requests that attached to an existing fetch
    pub coalesced_requests: u64,
    /// Requests that became fetch owners
    pub new_requests: u64,
}

impl CoalescerStats {
    /// Returns the coalescing ratio (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Tracks in-flight fetches so duplicate requests wait for the same
/// result instead of triggering duplicate work.
pub struct FetchCoalescer {
    /// In-flight fetches: key -> broadcast sender for the result
    in_flight: DashMap<CacheKey, broadcast::Sender<FetchResult>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    new_requests: AtomicU64,
}

impl FetchCoalescer {
    /// Creates a new coalescer with an empty in-flight table.
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            new_requests: AtomicU64::new(0),
        }
    }

    /// Registers a request for `key`.
    ///
    /// Returns [`Registration::Owner`] if this is the first request for
    /// the key - the caller must run the fetch and report through
    /// [`complete`](Self::complete) (or [`abandon`](Self::abandon) if it
    /// cannot). Returns [`Registration::Waiter`] with a receiver when a
    /// fetch is already in flight.
    pub fn register(&self, key: CacheKey) -> Registration {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let address = key.address().to_owned();

        match self.in_flight.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let rx = entry.get().subscribe();
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(address = address.as_str(), "attaching to in-flight fetch");
                Registration::Waiter(rx)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                // Capacity covers the single result broadcast; waiters
                // subscribe before it is sent.
                let (tx, _rx) = broadcast::channel(16);
                entry.insert(tx);
                self.new_requests.fetch_add(1, Ordering::Relaxed);
                debug!(address = address.as_str(), "registered new fetch");
                Registration::Owner
            }
        }
    }

    /// Completes a fetch, broadcasting `result` to all waiters.
    ///
    /// The in-flight entry is removed *before* the broadcast, so a new
    /// request arriving after completion always starts a fresh fetch
    /// rather than attaching to a spent handle. Failures pass through
    /// here like successes - they are delivered once and remembered
    /// nowhere.
    pub fn complete(&self, key: &CacheKey, result: FetchResult) {
        if let Some((_, tx)) = self.in_flight.remove(key) {
            let waiters = tx.receiver_count();
            let _ = tx.send(result);

            if waiters > 0 {
                debug!(
                    address = key.address(),
                    waiters,
                    "broadcast fetch result to waiters"
                );
            }
        }
    }

    /// Drops an in-flight fetch without a result.
    ///
    /// Closing the channel wakes every waiter with an error they surface
    /// as [`FetchError::Interrupted`]. Called when the owning request is
    /// dropped before its fetch resolves.
    pub fn abandon(&self, key: &CacheKey) {
        if self.in_flight.remove(key).is_some() {
            debug!(address = key.address(), "abandoned in-flight fetch");
        }
    }

    /// Returns the number of currently in-flight fetches.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns a snapshot of the current statistics.
    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for FetchCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
