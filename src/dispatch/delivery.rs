//! Batch delivery with retries.
//!
//! One worker task delivers batches in order. A batch is attempted up to
//! `max_attempts` times with capped exponential backoff between attempts;
//! each outcome is written back to the store before the next step.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use super::backoff::RetryPolicy;
use super::debounce::Batch;
use super::sink::TriggerSink;
use crate::signal::ShutdownHandler;
use crate::store::StateStore;
use crate::watcher::{with_store, WatchStats};

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the trigger.
    Delivered {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Shutdown arrived while waiting to retry.
    Abandoned {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Fires triggers for batches and records the results.
#[derive(Debug)]
pub struct Deliverer<S> {
    sink: S,
    store: Arc<StateStore>,
    policy: RetryPolicy,
    stats: Arc<WatchStats>,
}

impl<S: TriggerSink> Deliverer<S> {
    /// Create a deliverer.
    pub fn new(sink: S, store: Arc<StateStore>, policy: RetryPolicy, stats: Arc<WatchStats>) -> Self {
        Self {
            sink,
            store,
            policy,
            stats,
        }
    }

    /// Deliver one batch, retrying per the policy.
    ///
    /// An attempt already in flight always runs to completion (bounded by
    /// the sink's own timeout); shutdown only prevents further attempts.
    pub async fn deliver(&self, batch: &Batch, shutdown: &ShutdownHandler) -> DeliveryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let started = Utc::now();
            // The downstream call reindexes everything, so it also covers
            // changes left pending by earlier failed batches.
            let carried = with_store(&self.store, StateStore::pending_paths)
                .await
                .unwrap_or_else(|e| {
                    log::warn!("Could not read pending changes: {}", e);
                    Vec::new()
                });

            self.stats.delivery_attempts.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "Trigger attempt attempt={}/{} paths={} events={} unstable={}",
                attempt,
                max_attempts,
                batch.paths.len(),
                batch.events,
                batch.unstable
            );

            match self.sink.fire().await {
                Ok(status) => {
                    let covered: BTreeSet<String> =
                        batch.paths.iter().chain(carried.iter()).cloned().collect();
                    let covered_count = covered.len();
                    let recorded =
                        with_store(&self.store, move |store| store.record_delivery(&covered, started));
                    if let Err(e) = recorded.await {
                        log::error!("Could not record delivery: {}", e);
                    }
                    self.stats.successful_triggers.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "Trigger delivered status={} attempt={} paths={}",
                        status,
                        attempt,
                        covered_count
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    log::warn!("Trigger attempt failed attempt={}/{}: {}", attempt, max_attempts, e);
                    let paths = batch.paths.clone();
                    let recorded =
                        with_store(&self.store, move |store| store.record_failed_attempt(&paths));
                    if let Err(e) = recorded.await {
                        log::error!("Could not record failed attempt: {}", e);
                    }
                }
            }

            if attempt == max_attempts {
                break;
            }

            let delay = self.policy.delay_for(attempt);
            log::debug!("Retrying trigger in {:?}", delay);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::warn!(
                        "Shutdown during retry backoff, abandoning trigger attempts={} paths={}",
                        attempt,
                        batch.paths.len()
                    );
                    return DeliveryOutcome::Abandoned { attempts: attempt };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.stats.failed_triggers.fetch_add(1, Ordering::Relaxed);
        log::error!(
            "Trigger failed after {} attempts; changes stay pending paths={}",
            max_attempts,
            batch.paths.len()
        );
        DeliveryOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}

/// Deliver batches one at a time until shutdown or until the dispatcher
/// hangs up.
///
/// Batches that queued up while a delivery was running are merged and sent
/// as one trigger.
pub async fn run_delivery_worker<S: TriggerSink>(
    deliverer: Deliverer<S>,
    mut batches: mpsc::Receiver<Batch>,
    shutdown: ShutdownHandler,
) {
    loop {
        let mut batch = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        while let Ok(queued) = batches.try_recv() {
            batch.merge(queued);
        }

        deliverer.deliver(&batch, &shutdown).await;
    }

    batches.close();
    while let Ok(batch) = batches.try_recv() {
        log::warn!(
            "Undelivered batch at shutdown paths={} events={}",
            batch.paths.len(),
            batch.events
        );
    }
}
