//! Durable per-file state for the watcher.
//!
//! This module provides persistent storage for what the watcher knows
//! about every tracked file, so that restarting the process does not
//! re-trigger on content it has already reported.
//!
//! # Architecture
//!
//! The store is split into two main components:
//!
//! * [`database`]: SQLite persistence, schema management and the per-record
//!   operations used by the scanner, the poll confirmation and the
//!   dispatcher.
//! * [`record`]: The [`FileRecord`] model and the [`Observation`] fed into
//!   compare-and-upsert.
//!
//! # Consistency
//!
//! Every write is a single autocommitted statement (or a compare-and-write
//! pair under one lock) against a WAL database opened with
//! `synchronous = FULL`, so a write is on disk before the call returns.
//! The connection sits behind a mutex that is held for one record at a
//! time; a full scan never holds it across files.

pub mod database;
pub mod record;

pub use database::{StateStore, StoreError, StoreResult, DEFAULT_DB_NAME, SCHEMA_VERSION};
pub use record::{FileRecord, ObserveOutcome, Observation};
