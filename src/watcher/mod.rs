//! Change detection.
//!
//! Two detectors watch the same tree:
//!
//! - [`poller`]: cheap size/mtime polling against an in-memory snapshot.
//!   Candidates pass through the [`stability`] gate and are then confirmed
//!   by hashing against the store before they become events.
//! - [`checksum`]: periodic full scans that hash every file, reconcile with
//!   the store and detect deletions.
//!
//! Both feed one intake channel consumed by the
//! [`dispatch`](crate::dispatch) layer. The [`orchestrator`] wires the
//! loops together and owns shutdown.

pub mod checksum;
pub mod event;
pub mod orchestrator;
pub mod poller;
pub mod stability;
pub mod stats;

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;

use crate::scanner::ScanError;
use crate::store::{StateStore, StoreError, StoreResult};

pub use checksum::{ChecksumScanner, PassSummary, Reconciler};
pub use event::{Candidate, ChangeEvent, ChangeKind, EventSource};
pub use orchestrator::{Watcher, WatcherSettings};
pub use poller::PollObserver;
pub use stability::{GateConfig, Probe, StabilityGate, Verdict};
pub use stats::{StatsSnapshot, WatchStats};

/// Errors raised while detecting changes.
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// Listing, stat or hashing failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The state store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WatchError {
    /// True when the file vanished before it could be read.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Scan(e) if e.is_not_found())
    }
}

/// Sleep until `deadline`, or forever when there is none.
///
/// Lets `select!` loops treat "nothing scheduled" as a branch that never
/// fires.
pub(crate) fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Run one store call on the blocking pool.
///
/// Writes fsync before returning, so they stay off the runtime workers.
pub(crate) async fn with_store<T, F>(store: &Arc<StateStore>, call: F) -> Result<T, WatchError>
where
    T: Send + 'static,
    F: FnOnce(&StateStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || call(&store)).await??)
}
