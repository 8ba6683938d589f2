//! Watcher counters and periodic reporting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::with_store;
use crate::signal::ShutdownHandler;
use crate::store::StateStore;

/// Live counters shared by every loop.
#[derive(Debug, Default)]
pub struct WatchStats {
    /// Confirmed changes from the poll path.
    pub poll_events: AtomicU64,
    /// Changes from checksum scans.
    pub scan_events: AtomicU64,
    /// Candidates released by the gate before they settled.
    pub unstable_forwards: AtomicU64,
    /// Batches delivered.
    pub successful_triggers: AtomicU64,
    /// Batches that exhausted their retries.
    pub failed_triggers: AtomicU64,
    /// HTTP attempts made.
    pub delivery_attempts: AtomicU64,
}

impl WatchStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters out, together with the tracked file count.
    #[must_use]
    pub fn snapshot(&self, tracked_files: usize) -> StatsSnapshot {
        StatsSnapshot {
            poll_events: self.poll_events.load(Ordering::Relaxed),
            scan_events: self.scan_events.load(Ordering::Relaxed),
            unstable_forwards: self.unstable_forwards.load(Ordering::Relaxed),
            successful_triggers: self.successful_triggers.load(Ordering::Relaxed),
            failed_triggers: self.failed_triggers.load(Ordering::Relaxed),
            delivery_attempts: self.delivery_attempts.load(Ordering::Relaxed),
            tracked_files,
        }
    }
}

/// Point-in-time copy of [`WatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub poll_events: u64,
    pub scan_events: u64,
    pub unstable_forwards: u64,
    pub successful_triggers: u64,
    pub failed_triggers: u64,
    pub delivery_attempts: u64,
    pub tracked_files: usize,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "poll_events={} scan_events={} unstable_forwards={} successful_triggers={} \
             failed_triggers={} delivery_attempts={} tracked_files={}",
            self.poll_events,
            self.scan_events,
            self.unstable_forwards,
            self.successful_triggers,
            self.failed_triggers,
            self.delivery_attempts,
            self.tracked_files
        )
    }
}

/// Current snapshot, counting tracked files from the store.
pub async fn current(stats: &WatchStats, store: &Arc<StateStore>) -> StatsSnapshot {
    let tracked = with_store(store, StateStore::count).await.unwrap_or_else(|e| {
        log::debug!("Could not count tracked files: {}", e);
        0
    });
    stats.snapshot(tracked)
}

/// Log a snapshot every `interval` until shutdown.
pub async fn run_stats_loop(
    stats: Arc<WatchStats>,
    store: Arc<StateStore>,
    interval: Duration,
    shutdown: ShutdownHandler,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick is immediate; there is nothing to report yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                log::info!("Stats {}", current(&stats, &store).await);
            }
        }
    }
}
