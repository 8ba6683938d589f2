//! SQLite-backed file state database.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::record::{FileRecord, ObserveOutcome, Observation};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 2;

/// Default database filename, created inside the watch root unless
/// `db_path` is configured.
pub const DEFAULT_DB_NAME: &str = ".docwatch_state.db";

/// Columns selected when loading records; order matches `row_to_record`.
const RECORD_COLUMNS: &str = "path, size, modified_ns, checksum, last_triggered_at, \
                              attempt_count, pending, created_at, updated_at, changed_at";

/// Errors raised by the state store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// SQLite rejected an operation.
    #[error("state database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be prepared.
    #[error("state database I/O error for {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file was written by a newer version of the watcher.
    #[error("state database schema v{found} is newer than supported v{supported}")]
    SchemaTooNew {
        /// Version found on disk
        found: u32,
        /// Version this build understands
        supported: u32,
    },

    /// Another thread panicked while holding the connection.
    #[error("state database lock poisoned")]
    Poisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable keyed storage for [`FileRecord`]s.
pub struct StateStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open the database at `path`, creating it and its schema if absent.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL keeps readers off the writer's back; FULL makes each commit durable.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        log::debug!("Opened state database at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Location on disk, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS file_records (
                path TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                modified_ns INTEGER NOT NULL,
                checksum TEXT,
                last_triggered_at TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                pending INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                changed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_file_records_pending
                ON file_records(pending) WHERE pending = 1;",
        )?;

        let found: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match found.and_then(|v| v.parse::<u32>().ok()) {
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(version) if version > SCHEMA_VERSION => {
                return Err(StoreError::SchemaTooNew {
                    found: version,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(1) => {
                conn.execute_batch(
                    "ALTER TABLE file_records ADD COLUMN changed_at TEXT NOT NULL DEFAULT '';
                     UPDATE file_records SET changed_at = updated_at;",
                )?;
                conn.execute(
                    "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Load one record.
    pub fn get(&self, path: &str) -> StoreResult<Option<FileRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM file_records WHERE path = ?1"),
                [path],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace a record verbatim.
    pub fn put(&self, record: &FileRecord) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO file_records
                (path, size, modified_ns, checksum, last_triggered_at,
                 attempt_count, pending, created_at, updated_at, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.path,
                size_to_sql(record.size),
                nanos(&record.modified),
                record.checksum,
                record.last_triggered_at.as_ref().map(timestamp),
                record.attempt_count,
                record.pending,
                timestamp(&record.created_at),
                timestamp(&record.updated_at),
                timestamp(&record.changed_at),
            ],
        )?;
        Ok(())
    }

    /// Remove a record. Returns whether one existed.
    pub fn delete(&self, path: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM file_records WHERE path = ?1", [path])?;
        Ok(removed > 0)
    }

    /// Remove a record only if it was last written before `since`.
    ///
    /// The scanner uses this for its deletion set so that a record written
    /// by a poll confirmation during the pass survives.
    pub fn delete_if_stale(&self, path: &str, since: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM file_records WHERE path = ?1 AND updated_at < ?2",
            params![path, timestamp(&since)],
        )?;
        Ok(removed > 0)
    }

    /// Every stored record, ordered by path.
    pub fn list_all(&self) -> StoreResult<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM file_records ORDER BY path"))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every stored key.
    pub fn keys(&self) -> StoreResult<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT path FROM file_records")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    /// Number of tracked files.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Compare a freshly hashed file with its record and write the result.
    ///
    /// Read and write happen under one lock so concurrent observers of the
    /// same path cannot both report a change for identical content.
    pub fn observe(&self, observation: &Observation, now: DateTime<Utc>) -> StoreResult<ObserveOutcome> {
        let conn = self.lock()?;
        let stored: Option<Option<String>> = conn
            .query_row(
                "SELECT checksum FROM file_records WHERE path = ?1",
                [&observation.path],
                |row| row.get(0),
            )
            .optional()?;

        let modified = nanos(&DateTime::<Utc>::from(observation.modified));
        let size = size_to_sql(observation.size);
        let now = timestamp(&now);

        let outcome = match stored {
            None => {
                conn.execute(
                    "INSERT INTO file_records
                        (path, size, modified_ns, checksum, attempt_count, pending,
                         created_at, updated_at, changed_at)
                     VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?5, ?5)",
                    params![observation.path, size, modified, observation.checksum, now],
                )?;
                ObserveOutcome::Created
            }
            Some(Some(ref checksum)) if *checksum == observation.checksum => {
                conn.execute(
                    "UPDATE file_records SET size = ?2, modified_ns = ?3, updated_at = ?4
                     WHERE path = ?1",
                    params![observation.path, size, modified, now],
                )?;
                ObserveOutcome::Unchanged
            }
            Some(_) => {
                conn.execute(
                    "UPDATE file_records
                     SET size = ?2, modified_ns = ?3, checksum = ?4, pending = 1,
                         updated_at = ?5, changed_at = ?5
                     WHERE path = ?1",
                    params![observation.path, size, modified, observation.checksum, now],
                )?;
                ObserveOutcome::Modified
            }
        };
        Ok(outcome)
    }

    /// Count one failed delivery attempt against each path.
    pub fn record_failed_attempt<'a, I>(&self, paths: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for path in paths {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE file_records SET attempt_count = attempt_count + 1 WHERE path = ?1",
                [path],
            )?;
        }
        Ok(())
    }

    /// Mark each path as delivered by a trigger that started at `at`.
    ///
    /// Attempts reset and `last_triggered_at` is set. `pending` is only
    /// cleared when the content last changed at or before `at`; a change
    /// that landed while the request was in flight stays pending.
    pub fn record_delivery<'a, I>(&self, paths: I, at: DateTime<Utc>) -> StoreResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let at = timestamp(&at);
        for path in paths {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE file_records
                 SET attempt_count = 0,
                     last_triggered_at = ?2,
                     pending = CASE WHEN changed_at <= ?2 THEN 0 ELSE pending END
                 WHERE path = ?1",
                params![path, at],
            )?;
        }
        Ok(())
    }

    /// Keys whose latest change has not been delivered yet.
    pub fn pending_paths(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path FROM file_records WHERE pending = 1 ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    /// Drop every record.
    pub fn clear(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM file_records", [])?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(1)?;
    let modified_ns: i64 = row.get(2)?;
    let last_triggered: Option<String> = row.get(4)?;
    Ok(FileRecord {
        path: row.get(0)?,
        size: u64::try_from(size).unwrap_or(0),
        modified: DateTime::from_timestamp_nanos(modified_ns),
        checksum: row.get(3)?,
        last_triggered_at: last_triggered
            .map(|s| parse_timestamp(4, &s))
            .transpose()?,
        attempt_count: row.get(5)?,
        pending: row.get(6)?,
        created_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
        changed_at: parse_timestamp(9, &row.get::<_, String>(9)?)?,
    })
}

/// Fixed-width UTC timestamps sort lexically in time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn nanos(at: &DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(0)
}

fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
