//! Wiring of the watcher loops.
//!
//! ```text
//!  poll loop ──candidates──▶ stability gate ──┐
//!                                             ├──intake──▶ dispatcher ──batches──▶ delivery
//!  scan loop ─────────────────────────────────┘
//! ```
//!
//! Each loop is its own task and owns its state. All of them stop on the
//! shared [`ShutdownHandler`]; [`Watcher::run`] then joins them, reports
//! anything left undelivered and returns the final statistics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::checksum::{run_scan_loop, ChecksumScanner, Reconciler};
use super::event::{ChangeEvent, ChangeKind, EventSource};
use super::poller::{run_poll_loop, PollObserver};
use super::stability::{run_gate, GateConfig, StabilityGate};
use super::stats::{self, run_stats_loop, StatsSnapshot, WatchStats};
use super::{with_store, WatchError};
use crate::dispatch::{run_delivery_worker, run_dispatcher, Debouncer, Deliverer, RetryPolicy, TriggerSink};
use crate::scanner::Walker;
use crate::signal::ShutdownHandler;
use crate::store::StateStore;

const CANDIDATE_CAPACITY: usize = 1024;
const INTAKE_CAPACITY: usize = 1024;
const BATCH_CAPACITY: usize = 16;

/// Timing for every loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub scan_interval: Duration,
    pub debounce: Duration,
    pub gate: GateConfig,
    pub io_timeout: Duration,
    pub retry: RetryPolicy,
    pub stats_interval: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            scan_interval: Duration::from_secs(300),
            debounce: Duration::from_secs(60),
            gate: GateConfig::default(),
            io_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            stats_interval: Duration::from_secs(300),
        }
    }
}

/// The running watcher.
pub struct Watcher<S> {
    walker: Arc<Walker>,
    store: Arc<StateStore>,
    sink: S,
    settings: WatcherSettings,
    stats: Arc<WatchStats>,
}

impl<S: TriggerSink> Watcher<S> {
    /// Assemble a watcher. Nothing runs until [`Self::run`].
    pub fn new(walker: Walker, store: Arc<StateStore>, sink: S, settings: WatcherSettings) -> Self {
        Self {
            walker: Arc::new(walker),
            store,
            sink,
            settings,
            stats: Arc::new(WatchStats::new()),
        }
    }

    /// Live counters, shared with the running loops.
    #[must_use]
    pub fn stats(&self) -> Arc<WatchStats> {
        Arc::clone(&self.stats)
    }

    /// Run every loop until `shutdown` is requested.
    ///
    /// # Errors
    ///
    /// Fails only if the store cannot be read while restoring undelivered
    /// changes.
    pub async fn run(self, shutdown: ShutdownHandler) -> Result<StatsSnapshot, WatchError> {
        let Self {
            walker,
            store,
            sink,
            settings,
            stats,
        } = self;

        log::info!(
            "Watching {} poll_interval={:?} scan_interval={:?} debounce={:?} wait_stable={:?}",
            walker.root().display(),
            settings.poll_interval,
            settings.scan_interval,
            settings.debounce,
            settings.gate.wait_stable
        );

        let mut debouncer = Debouncer::new(settings.debounce);
        let restored = with_store(&store, StateStore::pending_paths).await?;
        if !restored.is_empty() {
            log::info!("Restoring {} undelivered changes from the last run", restored.len());
            let now = Instant::now();
            for path in restored {
                debouncer.push(
                    ChangeEvent::new(path, ChangeKind::Modified, EventSource::Restored),
                    now,
                );
            }
        }

        let (candidate_tx, candidate_rx) = mpsc::channel(CANDIDATE_CAPACITY);
        let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CAPACITY);

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&walker),
            Arc::clone(&store),
            settings.io_timeout,
        ));

        let poll = tokio::spawn(run_poll_loop(
            PollObserver::new(Arc::clone(&walker), settings.io_timeout),
            settings.poll_interval,
            candidate_tx,
            shutdown.clone(),
        ));
        let gate = tokio::spawn(run_gate(
            StabilityGate::new(settings.gate),
            Arc::clone(&reconciler),
            candidate_rx,
            intake_tx.clone(),
            Arc::clone(&stats),
            shutdown.clone(),
        ));
        let scan = tokio::spawn(run_scan_loop(
            ChecksumScanner::new(reconciler),
            settings.scan_interval,
            intake_tx,
            Arc::clone(&stats),
            shutdown.clone(),
        ));
        let dispatcher = tokio::spawn(run_dispatcher(
            debouncer,
            intake_rx,
            batch_tx,
            shutdown.clone(),
        ));
        let delivery = tokio::spawn(run_delivery_worker(
            Deliverer::new(sink, Arc::clone(&store), settings.retry, Arc::clone(&stats)),
            batch_rx,
            shutdown.clone(),
        ));
        let reporter = tokio::spawn(run_stats_loop(
            Arc::clone(&stats),
            Arc::clone(&store),
            settings.stats_interval,
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        log::info!("Shutdown requested, stopping watcher loops");

        for (name, task) in [("poll", poll), ("gate", gate), ("scan", scan)] {
            if let Err(e) = task.await {
                log::error!("{} loop ended abnormally: {}", name, e);
            }
        }
        match dispatcher.await {
            Ok(Some(batch)) => log::warn!(
                "Undelivered batch at shutdown paths={} events={}; changes stay pending for the next start",
                batch.paths.len(),
                batch.events
            ),
            Ok(None) => {}
            Err(e) => log::error!("dispatcher ended abnormally: {}", e),
        }
        for (name, task) in [("delivery", delivery), ("stats", reporter)] {
            if let Err(e) = task.await {
                log::error!("{} loop ended abnormally: {}", name, e);
            }
        }

        let snapshot = stats::current(&stats, &store).await;
        log::info!("Final stats {}", snapshot);
        Ok(snapshot)
    }
}
