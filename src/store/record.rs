//! Stored file state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Everything the watcher remembers about one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the watch root; the primary key.
    pub path: String,
    /// Size in bytes when last observed.
    pub size: u64,
    /// Modification time when last observed.
    pub modified: DateTime<Utc>,
    /// BLAKE3 hex digest of the content, once hashed.
    pub checksum: Option<String>,
    /// Last successful trigger that covered this file.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Failed delivery attempts since the last success.
    pub attempt_count: u32,
    /// A content change has been observed but not yet delivered.
    pub pending: bool,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the content last changed. Unchanged observations leave it alone.
    pub changed_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh record for a newly observed file.
    #[must_use]
    pub fn new(path: impl Into<String>, size: u64, modified: SystemTime, now: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified: DateTime::<Utc>::from(modified),
            checksum: None,
            last_triggered_at: None,
            attempt_count: 0,
            pending: false,
            created_at: now,
            updated_at: now,
            changed_at: now,
        }
    }

    /// Attach a checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// A freshly hashed file, ready to be compared against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Store key.
    pub path: String,
    /// Observed size in bytes.
    pub size: u64,
    /// Observed modification time.
    pub modified: SystemTime,
    /// BLAKE3 hex digest.
    pub checksum: String,
}

/// Result of comparing an [`Observation`] with the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// No record existed; one was inserted.
    Created,
    /// The checksum differed; the record was updated.
    Modified,
    /// Same content as before; only bookkeeping fields were refreshed.
    Unchanged,
}

impl ObserveOutcome {
    /// True for outcomes that should reach the dispatcher.
    #[must_use]
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}
