//! Output formatters for the `status` subcommand.
//!
//! - [`json`]: machine-readable report for scripting
//! - [`table`]: aligned text table for terminals
//!
//! Both render the same [`StatusReport`](json::StatusReport).

pub mod json;
pub mod table;

pub use json::{OutputError, StatusReport};
pub use table::TableOutput;
