//! Change events shared by both detectors and the dispatcher.

use std::fmt;
use std::path::PathBuf;

use crate::store::ObserveOutcome;

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Path was not tracked before.
    Created,
    /// Content of a tracked path changed.
    Modified,
    /// Tracked path no longer exists.
    Deleted,
}

impl ChangeKind {
    /// Map a store outcome to an event kind; `Unchanged` has none.
    #[must_use]
    pub fn from_outcome(outcome: ObserveOutcome) -> Option<Self> {
        match outcome {
            ObserveOutcome::Created => Some(Self::Created),
            ObserveOutcome::Modified => Some(Self::Modified),
            ObserveOutcome::Unchanged => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Which detector produced an event. Informational only; coalescing
/// ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Poll observer, after the stability gate and store confirmation.
    Poll,
    /// Checksum scanner.
    Scan,
    /// Undelivered change carried over from a previous run.
    Restored,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Scan => write!(f, "scan"),
            Self::Restored => write!(f, "restored"),
        }
    }
}

/// A confirmed change headed for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Store key of the file.
    pub path: String,
    /// What happened.
    pub kind: ChangeKind,
    /// Which detector saw it.
    pub source: EventSource,
    /// Forwarded by the stability gate after exhausting its retries.
    pub possibly_unstable: bool,
}

impl ChangeEvent {
    /// Build an event.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: ChangeKind, source: EventSource) -> Self {
        Self {
            path: path.into(),
            kind,
            source,
            possibly_unstable: false,
        }
    }

    /// Flag the event as forwarded before the file settled.
    #[must_use]
    pub fn unstable(mut self, possibly_unstable: bool) -> Self {
        self.possibly_unstable = possibly_unstable;
        self
    }
}

/// Candidate emitted by the poll observer before the stability gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Store key.
    pub path: String,
    /// Path on disk. Differs from the key when the name is not NFC.
    pub file: PathBuf,
    /// `Created` or `Modified`; the poller never emits deletions.
    pub kind: ChangeKind,
    /// Size the poller saw.
    pub size: u64,
}
