//! Host low-memory signal plumbing.
//!
//! The host environment owns a [`MemoryPressure`] handle and fires it
//! when the platform reports memory pressure. A cache built with
//! [`ImageCache::with_pressure_signal`](crate::cache::ImageCache::with_pressure_signal)
//! subscribes at construction and purges its memory tier on every
//! signal; the subscription ends when the cache is dropped. There is no
//! implicit lifetime coupling between the two sides - either may outlive
//! the other.

use crate::memory::MemoryCache;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cloneable low-memory signal source owned by the host environment.
#[derive(Debug, Clone)]
pub struct MemoryPressure {
    tx: broadcast::Sender<()>,
}

impl MemoryPressure {
    /// Create a new signal source with no subscribers.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(4);
        Self { tx }
    }

    /// Notify every subscribed cache. A no-op with no subscribers.
    pub fn signal(&self) {
        let _ = self.tx.send(());
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the listener task purging `memory` on each pressure signal.
///
/// Runs until `stop` is cancelled or the signal source is dropped.
pub(crate) fn spawn_listener(
    memory: Arc<MemoryCache>,
    signal: &MemoryPressure,
    stop: CancellationToken,
) {
    let mut rx = signal.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("memory pressure listener stopped");
                    break;
                }
                received = rx.recv() => match received {
                    // A lagged receiver only means signals arrived faster
                    // than we drained them; one purge still suffices.
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => memory.purge(),
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("memory pressure source dropped, listener stopped");
                        break;
                    }
                },
            }
        }
    });
}
