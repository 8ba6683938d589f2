//! Command-line interface definitions for docwatch.
//!
//! This module defines all CLI arguments, subcommands, and options using the
//! clap derive API. Global options control logging and error output; each
//! subcommand maps onto one entry point in [`crate::run_app`].
//!
//! # Example
//!
//! ```bash
//! # Watch a share and trigger a reindex after 60s of quiet
//! docwatch run --watch-dir /mnt/docs --endpoint http://indexer:8000/index
//!
//! # One reconciliation pass from cron, without triggering
//! docwatch scan --watch-dir /mnt/docs --no-trigger
//!
//! # What the watcher currently tracks
//! docwatch status --watch-dir /mnt/docs --json
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// Change-detection watcher for document stores on unreliable filesystems.
///
/// docwatch notices created, modified and deleted files by polling and by
/// periodic checksum scans, coalesces bursts, and fires one reindex trigger
/// per quiet period.
#[derive(Debug, Parser)]
#[command(name = "docwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a TOML config file
    ///
    /// Defaults to config.toml in the platform config directory, if present.
    #[arg(long, value_name = "FILE", global = true, env = "DOCWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the watcher
    Run(RunArgs),
    /// Run a single reconciliation pass and optionally trigger once
    Scan(ScanArgs),
    /// Show what the state database tracks
    Status(StatusArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

/// Options that locate the watched tree and its state.
#[derive(Debug, Clone, Default, Args)]
pub struct LocationArgs {
    /// Directory to watch
    #[arg(long, value_name = "DIR")]
    pub watch_dir: Option<PathBuf>,

    /// State database path [default: <watch-dir>/.docwatch_state.db]
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

/// Options that decide which files are watched.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// File extensions to watch (replaces the default list)
    #[arg(long, value_name = "EXT", num_args = 1..)]
    pub allowed_extensions: Option<Vec<String>>,

    /// Directory names to skip (replaces the default list)
    #[arg(long = "exclude-dir", value_name = "NAME")]
    pub exclude_dirs: Option<Vec<String>>,

    /// Ignore files smaller than this (e.g., 10, 1KB, 2MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,
}

/// Options for triggering the downstream endpoint.
#[derive(Debug, Clone, Default, Args)]
pub struct TriggerArgs {
    /// URL that receives POST {} reindex triggers
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Disable TLS certificate verification for the endpoint
    #[arg(long)]
    pub insecure: bool,
}

/// Arguments for the run subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Quiet period in seconds before a batch of changes fires
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub debounce: Option<f64>,

    /// Seconds between poll listings
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub poll_interval: Option<f64>,

    /// Seconds between full checksum scans
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub scan_interval: Option<f64>,

    /// Seconds a file's size must hold before a poll change is accepted
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub wait_stable: Option<f64>,

    /// Wait for this URL to answer 2xx before starting
    #[arg(long, value_name = "URL")]
    pub health_url: Option<String>,

    /// Seconds between statistics log lines
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub stats_interval: Option<f64>,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Record changes without firing a trigger
    #[arg(long)]
    pub no_trigger: bool,
}

/// Arguments for the status subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    #[command(flatten)]
    pub trigger: TriggerArgs,
}

impl LocationArgs {
    fn apply(&self, overrides: &mut ConfigOverrides) {
        overrides.watch_dir.clone_from(&self.watch_dir);
        overrides.db_path.clone_from(&self.db_path);
    }
}

impl FilterArgs {
    fn apply(&self, overrides: &mut ConfigOverrides) {
        overrides.allowed_extensions.clone_from(&self.allowed_extensions);
        overrides.exclude_dirs.clone_from(&self.exclude_dirs);
        overrides.min_size = self.min_size;
    }
}

impl TriggerArgs {
    fn apply(&self, overrides: &mut ConfigOverrides) {
        overrides.endpoint.clone_from(&self.endpoint);
        // A bare flag can only switch verification off.
        overrides.insecure = self.insecure.then_some(true);
    }
}

impl Commands {
    /// The configuration layer contributed by this subcommand's flags.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::default();
        match self {
            Self::Run(args) => {
                args.location.apply(&mut overrides);
                args.trigger.apply(&mut overrides);
                args.filter.apply(&mut overrides);
                overrides.debounce = args.debounce;
                overrides.poll_interval = args.poll_interval;
                overrides.scan_interval = args.scan_interval;
                overrides.wait_stable = args.wait_stable;
                overrides.stats_interval = args.stats_interval;
                overrides.health_url.clone_from(&args.health_url);
            }
            Self::Scan(args) => {
                args.location.apply(&mut overrides);
                args.trigger.apply(&mut overrides);
                args.filter.apply(&mut overrides);
            }
            Self::Status(args) => args.location.apply(&mut overrides),
            Self::Config(args) => {
                args.location.apply(&mut overrides);
                args.trigger.apply(&mut overrides);
            }
        }
        overrides
    }
}

/// Parse a duration in seconds; fractions are allowed.
pub fn parse_seconds(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number of seconds: '{s}'"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("Seconds must be positive, got '{s}'"));
    }
    Ok(value)
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB.
/// A bare number is bytes.
///
/// # Examples
///
/// ```
/// use docwatch::cli::parse_size;
///
/// assert_eq!(parse_size("10").unwrap(), 10);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// assert_eq!(parse_size("1.5MB").unwrap(), 1_500_000);
/// ```
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
