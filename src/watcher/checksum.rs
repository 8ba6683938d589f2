//! Content reconciliation against the state store.
//!
//! [`Reconciler`] is the single path by which a file's content reaches the
//! store: it stats and hashes one file under the I/O timeout and then
//! compares-and-upserts the result. The stability gate uses it to confirm
//! poll candidates, and [`ChecksumScanner`] uses it for every file of a
//! full pass.
//!
//! A pass ends with deletion detection. A stored key is only deleted when
//! all of the following hold:
//!
//! - the pass ran to completion (no shutdown mid-listing),
//! - the key was not listed, and did not fail to hash,
//! - no directory above it failed to list,
//! - the file is still absent when re-checked,
//! - no one wrote the record after the pass started.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::event::{ChangeEvent, ChangeKind, EventSource};
use super::stability::Probe;
use super::stats::WatchStats;
use super::WatchError;
use crate::scanner::path_utils::{relative_key, resolve_key};
use crate::scanner::{hash_to_hex, FileEntry, Hasher, ScanError, Walker};
use crate::signal::ShutdownHandler;
use crate::store::{ObserveOutcome, Observation, StateStore};

/// Stats, hashes and records single files.
#[derive(Debug)]
pub struct Reconciler {
    walker: Arc<Walker>,
    hasher: Hasher,
    store: Arc<StateStore>,
    io_timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler over `walker`'s root.
    #[must_use]
    pub fn new(walker: Arc<Walker>, store: Arc<StateStore>, io_timeout: Duration) -> Self {
        Self {
            walker,
            hasher: Hasher::new(),
            store,
            io_timeout,
        }
    }

    /// The walker whose filter and root this reconciler uses.
    #[must_use]
    pub fn walker(&self) -> &Arc<Walker> {
        &self.walker
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Absolute path for a store key.
    #[must_use]
    pub fn resolve(&self, key: &str) -> PathBuf {
        resolve_key(self.walker.root(), key)
    }

    /// Current size of `file`, for the stability gate.
    pub async fn probe_size(&self, file: &Path) -> Probe {
        let path = file.to_path_buf();
        let follow = self.walker.config().follow_symlinks;

        let probe = tokio::task::spawn_blocking(move || {
            let metadata = if follow {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            match metadata {
                Ok(m) if m.is_file() => Probe::Size(m.len()),
                Ok(_) => Probe::Missing,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Probe::Missing,
                Err(e) => {
                    log::debug!("Size probe failed for {}: {}", path.display(), e);
                    Probe::Failed
                }
            }
        });

        match tokio::time::timeout(self.io_timeout, probe).await {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) => {
                log::warn!("Size probe task failed for {}: {}", file.display(), e);
                Probe::Failed
            }
            Err(_) => {
                log::warn!(
                    "Size probe timed out after {:?} path={}",
                    self.io_timeout,
                    file.display()
                );
                Probe::Failed
            }
        }
    }

    /// Stat and hash `path` off the async threads, bounded by the I/O timeout.
    ///
    /// `Ok(None)` means the path is no longer a watched regular file.
    pub async fn hash_file(&self, path: PathBuf) -> Result<Option<(FileEntry, String)>, WatchError> {
        let walker = Arc::clone(&self.walker);
        let hasher = self.hasher.clone();
        let target = path.clone();

        let work = tokio::task::spawn_blocking(move || -> Result<_, ScanError> {
            let Some(entry) = walker.stat(&target)? else {
                return Ok(None);
            };
            let hash = hasher.full_hash(&entry.path)?;
            Ok(Some((entry, hash_to_hex(&hash))))
        });

        match tokio::time::timeout(self.io_timeout, work).await {
            Ok(joined) => Ok(joined??),
            Err(_) => Err(ScanError::Timeout {
                path,
                timeout: self.io_timeout,
            }
            .into()),
        }
    }

    /// Hash `path` and compare-and-upsert it into the store.
    ///
    /// Returns the entry and the store's verdict, or `None` when the path is
    /// no longer watched.
    pub async fn reconcile(
        &self,
        path: PathBuf,
    ) -> Result<Option<(FileEntry, ObserveOutcome)>, WatchError> {
        let Some((entry, checksum)) = self.hash_file(path).await? else {
            return Ok(None);
        };

        let observation = Observation {
            path: entry.key.clone(),
            size: entry.size,
            modified: entry.modified,
            checksum,
        };
        let store = Arc::clone(&self.store);
        let outcome =
            tokio::task::spawn_blocking(move || store.observe(&observation, Utc::now())).await??;

        Ok(Some((entry, outcome)))
    }
}

/// Counters for one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Files listed and accounted for (including ones that failed to hash).
    pub files_seen: usize,
    /// New records.
    pub created: usize,
    /// Records whose checksum changed.
    pub modified: usize,
    /// Records removed because their file is gone.
    pub deleted: usize,
    /// Files with known content.
    pub unchanged: usize,
    /// Files or directories that could not be read.
    pub errors: usize,
    /// Wall time of the pass.
    pub duration: Duration,
    /// The pass stopped early for shutdown; deletions were skipped.
    pub interrupted: bool,
}

impl PassSummary {
    /// Number of events the pass emitted.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.created + self.modified + self.deleted
    }

    /// True when anything was created, modified or deleted.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes() > 0
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files_seen={} created={} modified={} deleted={} unchanged={} errors={} duration_ms={}",
            self.files_seen,
            self.created,
            self.modified,
            self.deleted,
            self.unchanged,
            self.errors,
            self.duration.as_millis()
        )?;
        if self.interrupted {
            write!(f, " interrupted=true")?;
        }
        Ok(())
    }
}

/// Full-tree reconciliation and deletion detection.
#[derive(Debug, Clone)]
pub struct ChecksumScanner {
    reconciler: Arc<Reconciler>,
}

impl ChecksumScanner {
    /// Create a scanner sharing `reconciler` with the poll confirmation.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Run one pass, sending every change to `intake`.
    ///
    /// # Errors
    ///
    /// Only fails when the store cannot list its keys; per-file problems
    /// are counted in [`PassSummary::errors`].
    pub async fn run_pass(
        &self,
        intake: &mpsc::Sender<ChangeEvent>,
        shutdown: &ShutdownHandler,
    ) -> Result<PassSummary, WatchError> {
        let started = Instant::now();
        let pass_started = Utc::now();
        let walker = Arc::clone(self.reconciler.walker());
        let root = walker.root().to_path_buf();
        let mut summary = PassSummary::default();

        let listing = {
            let walker = Arc::clone(&walker);
            tokio::task::spawn_blocking(move || walker.candidates().collect::<Vec<_>>()).await?
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut unreadable_dirs: Vec<String> = Vec::new();
        let mut paths = Vec::with_capacity(listing.len());

        for item in listing {
            match item {
                Ok(path) => paths.push(path),
                Err(e) => {
                    summary.errors += 1;
                    match relative_key(&root, e.path()) {
                        Some(key) => unreadable_dirs.push(key),
                        // The root itself failed; nothing may be deleted.
                        None => unreadable_dirs.push(String::new()),
                    }
                }
            }
        }

        for path in paths {
            if shutdown.is_shutdown_requested() {
                summary.interrupted = true;
                break;
            }

            match self.reconciler.reconcile(path.clone()).await {
                Ok(Some((entry, outcome))) => {
                    summary.files_seen += 1;
                    let kind = ChangeKind::from_outcome(outcome);
                    match kind {
                        Some(ChangeKind::Created) => summary.created += 1,
                        Some(_) => summary.modified += 1,
                        None => summary.unchanged += 1,
                    }
                    if let Some(kind) = kind {
                        log::info!("Change detected path={} kind={} source=scan", entry.key, kind);
                        emit(intake, ChangeEvent::new(entry.key.clone(), kind, EventSource::Scan))
                            .await;
                    }
                    seen.insert(entry.key);
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {
                    log::debug!("File vanished during scan: {}", path.display());
                }
                Err(e) => {
                    summary.files_seen += 1;
                    summary.errors += 1;
                    log::warn!("Scan could not reconcile {}: {}", path.display(), e);
                    if let Some(key) = relative_key(&root, &path) {
                        seen.insert(key);
                    }
                }
            }
        }

        // A shutdown flag also cuts the walker's listing short.
        if shutdown.is_shutdown_requested() {
            summary.interrupted = true;
        }

        if !summary.interrupted {
            summary.deleted = self
                .detect_deletions(&seen, &unreadable_dirs, pass_started, intake)
                .await?;
        }

        summary.duration = started.elapsed();
        Ok(summary)
    }

    async fn detect_deletions(
        &self,
        seen: &HashSet<String>,
        unreadable_dirs: &[String],
        pass_started: DateTime<Utc>,
        intake: &mpsc::Sender<ChangeEvent>,
    ) -> Result<usize, WatchError> {
        let store = Arc::clone(self.reconciler.store());
        let mut stored: Vec<String> = tokio::task::spawn_blocking(move || store.keys())
            .await??
            .into_iter()
            .filter(|key| !seen.contains(key))
            .filter(|key| !is_under_any(key, unreadable_dirs))
            .collect();
        stored.sort();

        let mut deleted = 0;
        for key in stored {
            if self.still_present(&key).await {
                log::debug!("Unlisted file still present, keeping record path={}", key);
                continue;
            }

            let store = Arc::clone(self.reconciler.store());
            let target = key.clone();
            let removed =
                tokio::task::spawn_blocking(move || store.delete_if_stale(&target, pass_started))
                    .await??;
            if removed {
                deleted += 1;
                log::info!("Change detected path={} kind=deleted source=scan", key);
                emit(intake, ChangeEvent::new(key, ChangeKind::Deleted, EventSource::Scan)).await;
            }
        }
        Ok(deleted)
    }

    /// Re-check a candidate for deletion. Anything short of a clean
    /// "not there" keeps the record.
    async fn still_present(&self, key: &str) -> bool {
        let path = self.reconciler.resolve(key);
        let walker = Arc::clone(self.reconciler.walker());
        if !walker.config().accepts_name(&path) {
            return false;
        }

        let timeout = self.reconciler.io_timeout;
        let check = tokio::task::spawn_blocking(move || walker.stat(&path));
        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(Ok(entry))) => entry.is_some(),
            Ok(Ok(Err(e))) => !e.is_not_found(),
            Ok(Err(_)) | Err(_) => true,
        }
    }
}

/// True when `key` lies inside one of `dirs` (an empty entry covers all).
fn is_under_any(key: &str, dirs: &[String]) -> bool {
    dirs.iter().any(|dir| {
        dir.is_empty()
            || key == dir
            || (key.starts_with(dir.as_str()) && key[dir.len()..].starts_with('/'))
    })
}

async fn emit(intake: &mpsc::Sender<ChangeEvent>, event: ChangeEvent) {
    if intake.send(event).await.is_err() {
        log::debug!("Intake closed, dropping scan event");
    }
}

/// Run a pass immediately and then every `interval` until shutdown.
pub async fn run_scan_loop(
    scanner: ChecksumScanner,
    interval: Duration,
    intake: mpsc::Sender<ChangeEvent>,
    stats: Arc<WatchStats>,
    shutdown: ShutdownHandler,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        log::debug!(
            "Starting checksum scan of {}",
            scanner.reconciler.walker().root().display()
        );
        match scanner.run_pass(&intake, &shutdown).await {
            Ok(summary) => {
                stats.scan_events.fetch_add(summary.changes() as u64, Ordering::Relaxed);
                log::info!("Scan pass complete {}", summary);
            }
            Err(e) => log::error!("Scan pass failed: {}", e),
        }
    }
}
