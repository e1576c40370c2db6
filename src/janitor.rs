//! Background housekeeping for the disk tier.
//!
//! Pruning is periodic maintenance, never part of the load path. The
//! janitor is opt-in: the facade starts it only when
//! [`DiskCacheConfig::janitor_interval`](crate::config::DiskCacheConfig::janitor_interval)
//! is set, and stops it when the cache is dropped.

use crate::disk::DiskCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn a task pruning records older than `max_age` every `interval`.
pub(crate) fn spawn_janitor(
    disk: Arc<DiskCache>,
    interval: Duration,
    max_age: Duration,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            max_age_secs = max_age.as_secs(),
            "disk janitor started"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so a freshly
        // created cache is not pruned at startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("disk janitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = disk.prune(max_age).await;
                    if removed > 0 {
                        debug!(removed, "janitor pruned stale records");
                    }
                }
            }
        }
    });
}
