//! Size/mtime polling.
//!
//! The poll observer keeps an in-memory snapshot of `key -> (size, mtime)`
//! and diffs each listing against it. It never touches the store and never
//! reports deletions; a path that disappears simply drops out of the
//! snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::event::{Candidate, ChangeKind};
use crate::scanner::{FileEntry, ScanError, Walker};
use crate::signal::ShutdownHandler;

type Listing = Vec<Result<FileEntry, ScanError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Seen {
    size: u64,
    modified: SystemTime,
}

/// Periodic lister that turns metadata deltas into candidates.
#[derive(Debug)]
pub struct PollObserver {
    walker: Arc<Walker>,
    io_timeout: Duration,
    snapshot: HashMap<String, Seen>,
    primed: bool,
    in_flight: Option<JoinHandle<Listing>>,
}

impl PollObserver {
    /// Create an observer with an empty, unprimed snapshot.
    #[must_use]
    pub fn new(walker: Arc<Walker>, io_timeout: Duration) -> Self {
        Self {
            walker,
            io_timeout,
            snapshot: HashMap::new(),
            primed: false,
            in_flight: None,
        }
    }

    /// Number of paths in the snapshot.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.snapshot.len()
    }

    /// Diff a listing against the snapshot and replace it.
    ///
    /// `unreadable` holds keys whose stat failed this tick; they keep their
    /// previous snapshot entry so a transient error does not look like a
    /// change on the next tick. The first call only primes the snapshot.
    pub fn diff(&mut self, entries: Vec<FileEntry>, unreadable: &HashSet<String>) -> Vec<Candidate> {
        let mut next = HashMap::with_capacity(entries.len());
        let mut candidates = Vec::new();

        for entry in entries {
            let seen = Seen {
                size: entry.size,
                modified: entry.modified,
            };
            let kind = match self.snapshot.get(&entry.key) {
                None => Some(ChangeKind::Created),
                Some(old) if *old != seen => Some(ChangeKind::Modified),
                Some(_) => None,
            };
            if let Some(kind) = kind.filter(|_| self.primed) {
                candidates.push(Candidate {
                    path: entry.key.clone(),
                    file: entry.path.clone(),
                    kind,
                    size: entry.size,
                });
            }
            next.insert(entry.key, seen);
        }

        for key in unreadable {
            if let Some(old) = self.snapshot.get(key) {
                next.entry(key.clone()).or_insert(*old);
            }
        }

        self.snapshot = next;
        if !self.primed {
            log::debug!("Poll snapshot primed with {} files", self.snapshot.len());
            self.primed = true;
        }
        candidates
    }

    /// List the tree once and return the candidates.
    ///
    /// A listing that outlives the I/O timeout is kept and awaited again on
    /// the next tick instead of starting a second one alongside it.
    pub async fn tick(&mut self) -> Vec<Candidate> {
        let mut listing = match self.in_flight.take() {
            Some(handle) => handle,
            None => {
                let walker = Arc::clone(&self.walker);
                tokio::task::spawn_blocking(move || walker.walk().collect::<Listing>())
            }
        };

        let results = match tokio::time::timeout(self.io_timeout, &mut listing).await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                log::warn!("Poll listing task failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                log::warn!(
                    "Poll listing exceeded {:?}, skipping tick until it finishes",
                    self.io_timeout
                );
                self.in_flight = Some(listing);
                return Vec::new();
            }
        };

        let root = self.walker.root().to_path_buf();
        let mut entries = Vec::with_capacity(results.len());
        let mut unreadable = HashSet::new();
        for result in results {
            match result {
                Ok(entry) => entries.push(entry),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    log::debug!("Poll skipped {}: {}", e.path().display(), e);
                    if let Some(key) = crate::scanner::path_utils::relative_key(&root, e.path()) {
                        unreadable.insert(key);
                    }
                }
            }
        }

        self.diff(entries, &unreadable)
    }
}

/// Tick every `interval` and forward candidates to the stability gate.
pub async fn run_poll_loop(
    mut observer: PollObserver,
    interval: Duration,
    candidates: mpsc::Sender<Candidate>,
    shutdown: ShutdownHandler,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let found = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => tokio::select! {
                _ = shutdown.cancelled() => break,
                found = observer.tick() => found,
            },
        };

        if !found.is_empty() {
            log::debug!("Poll found {} candidates", found.len());
        }
        for candidate in found {
            if candidates.send(candidate).await.is_err() {
                return;
            }
        }
    }
    log::debug!("Poll loop stopped with {} files in snapshot", observer.tracked());
}
