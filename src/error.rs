//! Structured error handling and exit codes.

use serde::Serialize;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Exit codes for docwatch.
///
/// - 0: Success (including a graceful stop of a running watcher)
/// - 1: General error (unexpected failure)
/// - 2: Configuration error (missing or invalid option, bad watch dir)
/// - 3: State store unavailable
/// - 130: Interrupted before the watcher started (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The configuration was rejected before anything ran.
    ConfigError = 2,
    /// The state database could not be opened or created.
    StoreUnavailable = 3,
    /// Interrupted by user (Ctrl+C) during startup.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DW000",
            Self::GeneralError => "DW001",
            Self::ConfigError => "DW002",
            Self::StoreUnavailable => "DW003",
            Self::Interrupted => "DW130",
        }
    }

    /// Pick the exit code for an application error.
    ///
    /// Looks through the `anyhow` context chain for the component error
    /// that caused it.
    #[must_use]
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.is::<ConfigError>() {
                return Self::ConfigError;
            }
            if cause.is::<StoreError>() {
                return Self::StoreUnavailable;
            }
        }
        Self::GeneralError
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DW002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its context chain
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
