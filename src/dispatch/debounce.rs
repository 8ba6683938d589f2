//! Quiet-period coalescing.
//!
//! Every event joins the pending batch and pushes its deadline out to
//! `quiet` after the event. The batch fires once nothing has arrived for a
//! full quiet period. The source of an event plays no part in this.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::signal::ShutdownHandler;
use crate::watcher::{sleep_until_opt, ChangeEvent};

/// Changes coalesced into one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Distinct store keys that contributed.
    pub paths: BTreeSet<String>,
    /// Events received, including repeats for the same path.
    pub events: usize,
    /// Arrival of the first event.
    pub first_event: Instant,
    /// Arrival of the latest event.
    pub last_event: Instant,
    /// At least one event was forwarded before its file settled.
    pub unstable: bool,
}

impl Batch {
    fn new(event: ChangeEvent, now: Instant) -> Self {
        let mut batch = Self {
            paths: BTreeSet::new(),
            events: 0,
            first_event: now,
            last_event: now,
            unstable: false,
        };
        batch.add(event, now);
        batch
    }

    fn add(&mut self, event: ChangeEvent, now: Instant) {
        self.events += 1;
        self.last_event = now;
        self.unstable |= event.possibly_unstable;
        self.paths.insert(event.path);
    }

    /// Fold a later batch into this one.
    pub fn merge(&mut self, other: Batch) {
        self.events += other.events;
        self.first_event = self.first_event.min(other.first_event);
        self.last_event = self.last_event.max(other.last_event);
        self.unstable |= other.unstable;
        self.paths.extend(other.paths);
    }
}

/// Pending-batch state machine.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    pending: Option<Batch>,
}

impl Debouncer {
    /// Create an idle debouncer.
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    /// Add an event and reset the deadline.
    pub fn push(&mut self, event: ChangeEvent, now: Instant) {
        match self.pending.as_mut() {
            Some(batch) => batch.add(event, now),
            None => self.pending = Some(Batch::new(event, now)),
        }
    }

    /// When the pending batch fires, if there is one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|b| b.last_event + self.quiet)
    }

    /// Take the batch if its quiet period has elapsed at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.pending.take(),
            _ => None,
        }
    }

    /// Take the batch regardless of its deadline.
    pub fn take(&mut self) -> Option<Batch> {
        self.pending.take()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }
}

/// Coalesce the intake into batches until shutdown.
///
/// Returns whatever was still pending when the loop stopped.
pub async fn run_dispatcher(
    mut debouncer: Debouncer,
    mut intake: mpsc::Receiver<ChangeEvent>,
    batches: mpsc::Sender<Batch>,
    shutdown: ShutdownHandler,
) -> Option<Batch> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = intake.recv() => match event {
                Some(event) => {
                    log::debug!(
                        "Queued change path={} kind={} source={}",
                        event.path,
                        event.kind,
                        event.source
                    );
                    debouncer.push(event, Instant::now());
                }
                None => break,
            },
            _ = sleep_until_opt(debouncer.deadline()) => {
                if let Some(batch) = debouncer.take_due(Instant::now()) {
                    log::info!(
                        "Quiet period elapsed, firing batch paths={} events={}",
                        batch.paths.len(),
                        batch.events
                    );
                    if let Err(mpsc::error::SendError(batch)) = batches.send(batch).await {
                        return Some(batch);
                    }
                }
            }
        }
    }
    debouncer.take()
}
