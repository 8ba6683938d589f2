//! Stability gate for poll candidates.
//!
//! A candidate is held until two size probes `wait_stable` apart agree.
//! Each disagreement restarts the wait; after `max_retries` restarts the
//! candidate is released anyway and flagged possibly unstable, so a very
//! slow writer is delayed but never starved.
//!
//! [`StabilityGate`] is the pure state machine. [`run_gate`] drives it on
//! the runtime: it receives candidates from the poller, sleeps until the
//! earliest deadline and hands released candidates to the poll
//! confirmation. Size checks run as separate tasks, so a file on a stalled
//! mount only delays itself.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::checksum::Reconciler;
use super::event::{Candidate, ChangeEvent, ChangeKind, EventSource};
use super::stats::WatchStats;
use super::sleep_until_opt;
use crate::signal::ShutdownHandler;

/// Gate timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// How long a size must hold before a candidate is released.
    pub wait_stable: Duration,
    /// Restarts allowed before releasing a still-changing file.
    pub max_retries: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            wait_stable: Duration::from_secs(2),
            max_retries: 10,
        }
    }
}

/// Result of probing a held file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Current size in bytes.
    Size(u64),
    /// The file is gone.
    Missing,
    /// The probe failed or timed out.
    Failed,
}

/// What the gate decided after a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Size held for a full wait period.
    Stable(ChangeKind),
    /// Retries exhausted; released with the unstable flag.
    Unstable(ChangeKind),
    /// Still changing; a new wait was scheduled.
    Waiting,
    /// The file disappeared and was dropped from the gate.
    Vanished,
}

#[derive(Debug, Clone)]
struct Held {
    file: PathBuf,
    kind: ChangeKind,
    last_size: u64,
    retries: u32,
    due: Instant,
    /// A size check is running for this entry.
    checking: bool,
    /// Bumped by every re-offer; results for an older generation are dropped.
    generation: u64,
}

/// Candidates waiting for their size to settle.
#[derive(Debug, Default)]
pub struct StabilityGate {
    config: GateConfig,
    held: HashMap<String, Held>,
}

impl StabilityGate {
    /// Create an empty gate.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            held: HashMap::new(),
        }
    }

    /// Accept a candidate, or refresh the one already held for its path.
    pub fn offer(&mut self, candidate: Candidate, now: Instant) {
        let due = now + self.config.wait_stable;
        self.held
            .entry(candidate.path)
            .and_modify(|held| {
                if held.kind != ChangeKind::Created {
                    held.kind = candidate.kind;
                }
                held.file = candidate.file.clone();
                held.last_size = candidate.size;
                held.due = due;
                held.generation += 1;
            })
            .or_insert(Held {
                file: candidate.file,
                kind: candidate.kind,
                last_size: candidate.size,
                retries: 0,
                due,
                checking: false,
                generation: 0,
            });
    }

    /// Earliest deadline among held candidates with no check running.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.held.values().filter(|h| !h.checking).map(|h| h.due).min()
    }

    /// Paths whose wait has elapsed at `now` and that are not being checked.
    #[must_use]
    pub fn due_paths(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<_> = self
            .held
            .iter()
            .filter(|(_, h)| !h.checking && h.due <= now)
            .map(|(p, _)| p.clone())
            .collect();
        due.sort();
        due
    }

    /// Mark a held path as being checked.
    ///
    /// Returns the file to stat and the generation to hand back to
    /// [`finish_check`](Self::finish_check), or `None` if the path is not
    /// held or already has a check running.
    pub fn start_check(&mut self, path: &str) -> Option<(PathBuf, u64)> {
        let held = self.held.get_mut(path)?;
        if held.checking {
            return None;
        }
        held.checking = true;
        Some((held.file.clone(), held.generation))
    }

    /// Apply the result of a check started with [`start_check`](Self::start_check).
    ///
    /// A result for a candidate that was re-offered in the meantime is
    /// dropped and the newer wait stands.
    pub fn finish_check(
        &mut self,
        path: &str,
        generation: u64,
        probe: Probe,
        now: Instant,
    ) -> Option<Verdict> {
        let held = self.held.get_mut(path)?;
        held.checking = false;
        if held.generation != generation {
            return None;
        }
        self.observe(path, probe, now)
    }

    /// Apply a probe result to a held path.
    ///
    /// Returns `None` if the path is not held.
    pub fn observe(&mut self, path: &str, probe: Probe, now: Instant) -> Option<Verdict> {
        let held = self.held.get_mut(path)?;
        held.checking = false;

        let verdict = match probe {
            Probe::Missing => Verdict::Vanished,
            Probe::Size(size) if size == held.last_size => Verdict::Stable(held.kind),
            Probe::Size(_) | Probe::Failed => {
                held.retries += 1;
                if held.retries > self.config.max_retries {
                    Verdict::Unstable(held.kind)
                } else {
                    if let Probe::Size(size) = probe {
                        held.last_size = size;
                    }
                    held.due = now + self.config.wait_stable;
                    return Some(Verdict::Waiting);
                }
            }
        };

        self.held.remove(path);
        Some(verdict)
    }

    /// Number of held candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True when nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Outcome of one size check task.
struct SizeCheck {
    path: String,
    file: PathBuf,
    generation: u64,
    probe: Probe,
}

/// Drive the gate until shutdown or until the poller hangs up.
pub async fn run_gate(
    mut gate: StabilityGate,
    reconciler: Arc<Reconciler>,
    mut candidates: mpsc::Receiver<Candidate>,
    intake: mpsc::Sender<ChangeEvent>,
    stats: Arc<WatchStats>,
    shutdown: ShutdownHandler,
) {
    let mut checks: JoinSet<SizeCheck> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            candidate = candidates.recv() => match candidate {
                Some(candidate) => {
                    log::trace!("Gate holding path={} kind={}", candidate.path, candidate.kind);
                    gate.offer(candidate, Instant::now());
                }
                None => break,
            },
            _ = sleep_until_opt(gate.next_due()) => {
                for path in gate.due_paths(Instant::now()) {
                    let Some((file, generation)) = gate.start_check(&path) else {
                        continue;
                    };
                    let reconciler = Arc::clone(&reconciler);
                    checks.spawn(async move {
                        let probe = reconciler.probe_size(&file).await;
                        SizeCheck { path, file, generation, probe }
                    });
                }
            }
            Some(done) = checks.join_next(), if !checks.is_empty() => {
                let SizeCheck { path, file, generation, probe } = match done {
                    Ok(check) => check,
                    Err(e) => {
                        log::warn!("Size check task failed: {}", e);
                        continue;
                    }
                };
                match gate.finish_check(&path, generation, probe, Instant::now()) {
                    Some(Verdict::Stable(kind)) => {
                        release(&reconciler, &intake, &stats, path, file, kind, false);
                    }
                    Some(Verdict::Unstable(kind)) => {
                        log::warn!(
                            "File still changing after retries, forwarding path={} possibly_unstable=true",
                            path
                        );
                        stats.unstable_forwards.fetch_add(1, Ordering::Relaxed);
                        release(&reconciler, &intake, &stats, path, file, kind, true);
                    }
                    Some(Verdict::Vanished) => {
                        log::debug!("Held file vanished before settling path={}", path);
                    }
                    Some(Verdict::Waiting) | None => {}
                }
            }
        }
    }

    checks.abort_all();
    if !gate.is_empty() {
        log::info!(
            "Stability gate stopped with {} unsettled candidates; the next scan will pick them up",
            gate.len()
        );
    }
}

/// Confirm a released candidate against the store on its own task so a
/// slow hash never holds up the gate.
fn release(
    reconciler: &Arc<Reconciler>,
    intake: &mpsc::Sender<ChangeEvent>,
    stats: &Arc<WatchStats>,
    path: String,
    file: PathBuf,
    kind: ChangeKind,
    possibly_unstable: bool,
) {
    let reconciler = Arc::clone(reconciler);
    let intake = intake.clone();
    let stats = Arc::clone(stats);

    tokio::spawn(async move {
        match reconciler.reconcile(file).await {
            Ok(Some((_, outcome))) => match ChangeKind::from_outcome(outcome) {
                Some(confirmed) => {
                    log::info!(
                        "Change detected path={} kind={} source=poll possibly_unstable={}",
                        path,
                        confirmed,
                        possibly_unstable
                    );
                    stats.poll_events.fetch_add(1, Ordering::Relaxed);
                    let event = ChangeEvent::new(path, confirmed, EventSource::Poll)
                        .unstable(possibly_unstable);
                    // A closed intake means the dispatcher is shutting down.
                    let _ = intake.send(event).await;
                }
                None => {
                    log::debug!(
                        "Poll candidate has known content, suppressed path={} candidate={}",
                        path,
                        kind
                    );
                }
            },
            Ok(None) => log::debug!("Poll candidate no longer watched path={}", path),
            Err(e) if e.is_not_found() => {
                log::debug!("Poll candidate vanished before hashing path={}", path);
            }
            Err(e) => log::warn!("Could not confirm poll candidate path={}: {}", path, e),
        }
    });
}
