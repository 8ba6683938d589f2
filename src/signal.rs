//! Signal handling for graceful shutdown.
//!
//! This module provides centralized Ctrl+C / SIGTERM handling for docwatch.
//! The handler carries two views of the same signal:
//!
//! - an `AtomicBool` flag for blocking code (the directory walker checks it
//!   between entries), and
//! - a `tokio::sync::watch` channel so async loops can `select!` on
//!   [`ShutdownHandler::cancelled`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use docwatch::signal::install_handler;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//!
//! // Blocking workers poll the flag
//! let flag = handler.get_flag();
//!
//! // Async loops wait on the channel
//! # async fn example(handler: docwatch::signal::ShutdownHandler) {
//! handler.cancelled().await;
//! # }
//! ```
//!
//! # Exit Codes
//!
//! A signal that arrives before the watcher is running exits with 130
//! (128 + SIGINT). Once the watcher is running, a signal is a normal stop
//! and the process exits 0 after draining.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

/// Exit code for SIGINT (Ctrl+C) interruption.
/// This follows Unix convention: 128 + signal number (SIGINT = 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Centralized shutdown handler for graceful termination.
///
/// Cloning is cheap and every clone observes the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownHandler {
    /// The shared atomic flag indicating shutdown was requested.
    flag: Arc<AtomicBool>,
    /// Broadcast side for async waiters.
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandler {
    /// Create a new shutdown handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Manually request a shutdown.
    ///
    /// Sets the flag and wakes every task waiting in [`Self::cancelled`].
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.tx.send_replace(true);
    }

    /// Get a clone of the shutdown flag for blocking workers such as the
    /// [`Walker`](crate::scanner::Walker).
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Subscribe to the shutdown channel.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once shutdown has been requested.
    ///
    /// Returns immediately if it already was.
    pub async fn cancelled(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on `true`.
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Reset to the not-requested state.
    ///
    /// Primarily useful for tests that reuse the global handler.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.tx.send_replace(false);
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install a Ctrl+C / SIGTERM handler that requests shutdown.
///
/// Call once, early in startup. If a handler is already installed (for
/// example by an earlier test in the same process) the existing one is
/// reset and returned, so repeated `run_app()` calls never fail on
/// registration.
///
/// # Errors
///
/// Never fails in practice: if the hook cannot be registered an unhooked
/// handler is returned, which still honours [`ShutdownHandler::request_shutdown`].
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let hooked = handler.clone();

    match ctrlc::set_handler(move || {
        hooked.request_shutdown();

        let _ = writeln!(std::io::stderr(), "\nShutting down...");
        let _ = std::io::stderr().flush();

        log::info!("Shutdown signal received");
    }) {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(_) => {
            if let Some(handler) = GLOBAL_HANDLER.get() {
                handler.reset();
                Ok(handler.clone())
            } else {
                log::debug!("Ctrl+C handler already registered, using unhooked handler");
                let fallback = ShutdownHandler::new();
                let _ = GLOBAL_HANDLER.set(fallback.clone());
                Ok(fallback)
            }
        }
    }
}

/// Create a handler without installing any signal hooks.
///
/// ```
/// use docwatch::signal::create_handler;
/// let handler = create_handler();
/// assert!(!handler.is_shutdown_requested());
/// ```
#[must_use]
pub fn create_handler() -> ShutdownHandler {
    ShutdownHandler::new()
}
