//! JSON status report.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "db_path": "/srv/docs/.docwatch_state.db",
//!   "summary": {
//!     "tracked_files": 2,
//!     "total_size": 2048,
//!     "pending": 1,
//!     "failing": 0,
//!     "last_trigger": "2026-01-05T10:00:00Z"
//!   },
//!   "records": [
//!     {
//!       "path": "a.md",
//!       "size": 1024,
//!       "modified": "2026-01-05T09:59:00Z",
//!       "checksum": "af13...",
//!       "last_triggered_at": "2026-01-05T10:00:00Z",
//!       "attempt_count": 0,
//!       "pending": false
//!     }
//!   ]
//! }
//! ```

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::FileRecord;

/// One tracked file.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRecord {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub checksum: Option<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub pending: bool,
}

impl From<&FileRecord> for JsonRecord {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            modified: record.modified,
            checksum: record.checksum.clone(),
            last_triggered_at: record.last_triggered_at,
            attempt_count: record.attempt_count,
            pending: record.pending,
        }
    }
}

/// Totals over every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// Number of records
    pub tracked_files: usize,
    /// Sum of recorded sizes in bytes
    pub total_size: u64,
    /// Records with an undelivered change
    pub pending: usize,
    /// Records with failed attempts since their last delivery
    pub failing: usize,
    /// Most recent successful trigger across all records
    pub last_trigger: Option<DateTime<Utc>>,
}

impl StatusSummary {
    /// Compute totals.
    #[must_use]
    pub fn from_records(records: &[FileRecord]) -> Self {
        Self {
            tracked_files: records.len(),
            total_size: records.iter().map(|r| r.size).sum(),
            pending: records.iter().filter(|r| r.pending).count(),
            failing: records.iter().filter(|r| r.attempt_count > 0).count(),
            last_trigger: records.iter().filter_map(|r| r.last_triggered_at).max(),
        }
    }
}

/// Complete status output.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Database the report was read from
    pub db_path: String,
    /// Totals
    pub summary: StatusSummary,
    /// Every record, ordered by path
    pub records: Vec<JsonRecord>,
}

impl StatusReport {
    /// Build a report from the store's records.
    #[must_use]
    pub fn new(db_path: &Path, records: &[FileRecord]) -> Self {
        Self {
            db_path: db_path.display().to_string(),
            summary: StatusSummary::from_records(records),
            records: records.iter().map(JsonRecord::from).collect(),
        }
    }

    /// Serialize to pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty JSON to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), OutputError> {
        let json = self.to_json_pretty()?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors that can occur while writing a report.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error while writing report: {0}")]
    Io(#[from] std::io::Error),
}
