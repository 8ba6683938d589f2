//! docwatch - NFS-tolerant change watcher
//!
//! Watches a document directory by polling and periodic checksum scans,
//! waits for in-flight writes to settle, coalesces bursts of changes and
//! fires a single HTTP reindex trigger per batch. File state survives
//! restarts in a SQLite database so unchanged files never re-trigger.

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod output;
pub mod scanner;
pub mod signal;
pub mod store;
pub mod watcher;

pub use app::run_app;
