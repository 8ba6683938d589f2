//! Application configuration management.
//!
//! Settings are merged from four layers, later ones winning:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. a TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. `DOCWATCH_*` environment variables
//! 4. command-line flags ([`ConfigOverrides`])
//!
//! Durations are fractional seconds throughout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::dispatch::RetryPolicy;
use crate::scanner::WalkerConfig;
use crate::store::DEFAULT_DB_NAME;
use crate::watcher::{GateConfig, WatcherSettings};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "DOCWATCH_";

/// Extensions watched when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "pdf", "docx", "pptx", "html", "htm", "txt", "csv", "png", "jpg", "jpeg",
    "tiff", "tif",
];

/// Directories never descended into.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[".git", "node_modules", "__pycache__"];

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A required setting has no value in any layer.
    #[error("missing required setting '{0}'")]
    MissingField(&'static str),

    /// A setting has a value that cannot be used.
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The watch directory is missing or not a directory.
    #[error("watch directory {path} {reason}")]
    WatchDir {
        /// Configured path
        path: PathBuf,
        /// What is wrong with it
        reason: &'static str,
    },

    /// An explicitly requested config file does not exist.
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    /// The layers could not be merged or parsed.
    #[error("could not load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The effective configuration could not be rendered.
    #[error("could not render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Effective watcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the watched tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_dir: Option<PathBuf>,
    /// URL that receives `POST {}` triggers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// State database; defaults to a file inside the watch dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Quiet period before a batch fires.
    pub debounce: f64,
    pub poll_interval: f64,
    pub scan_interval: f64,
    /// How long a file's size must hold before a poll candidate is released.
    pub wait_stable: f64,
    pub stability_retries: u32,
    pub max_attempts: u32,
    pub retry_base_delay: f64,
    pub retry_max_delay: f64,
    pub http_timeout: f64,
    /// Bound on any single stat, hash or listing.
    pub io_timeout: f64,
    pub stats_interval: f64,
    /// Skip TLS certificate verification for the endpoint.
    pub insecure: bool,
    pub allowed_extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Gitignore-style patterns relative to the watch dir.
    pub ignore_patterns: Vec<String>,
    /// Files smaller than this many bytes are not watched.
    pub min_size: u64,
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
    /// Polled until healthy before the watcher starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
    pub health_timeout: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dir: None,
            endpoint: None,
            db_path: None,
            debounce: 60.0,
            poll_interval: 5.0,
            scan_interval: 300.0,
            wait_stable: 2.0,
            stability_retries: 10,
            max_attempts: 3,
            retry_base_delay: 1.0,
            retry_max_delay: 30.0,
            http_timeout: 120.0,
            io_timeout: 30.0,
            stats_interval: 300.0,
            insecure: false,
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| (*s).to_string()).collect(),
            ignore_patterns: Vec::new(),
            min_size: 10,
            skip_hidden: true,
            follow_symlinks: false,
            health_url: None,
            health_timeout: 60.0,
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_stable: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_dirs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
}

impl Config {
    /// Platform config file location, e.g. `~/.config/docwatch/config.toml`.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "docwatch", "docwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build the layered provider.
    ///
    /// An explicit `file` must exist; the platform default is used only if
    /// present.
    pub fn figment(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.to_path_buf())),
            Some(path) => {
                log::debug!("Loading config file {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_config_path().filter(|p| p.exists()) {
                    log::debug!("Loading config file {}", path.display());
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides)))
    }

    /// Merge every layer into a configuration. Does not validate.
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::figment(file, overrides)?
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// The watch root, which must exist and be a directory.
    pub fn watch_dir(&self) -> Result<&Path, ConfigError> {
        let path = self
            .watch_dir
            .as_deref()
            .ok_or(ConfigError::MissingField("watch_dir"))?;
        if !path.exists() {
            return Err(ConfigError::WatchDir {
                path: path.to_path_buf(),
                reason: "does not exist",
            });
        }
        if !path.is_dir() {
            return Err(ConfigError::WatchDir {
                path: path.to_path_buf(),
                reason: "is not a directory",
            });
        }
        Ok(path)
    }

    /// The trigger endpoint.
    pub fn endpoint(&self) -> Result<&str, ConfigError> {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => Ok(endpoint),
            _ => Err(ConfigError::MissingField("endpoint")),
        }
    }

    /// Where the state database lives.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match (&self.db_path, &self.watch_dir) {
            (Some(db), _) => Ok(db.clone()),
            (None, Some(dir)) => Ok(dir.join(DEFAULT_DB_NAME)),
            (None, None) => Err(ConfigError::MissingField("watch_dir")),
        }
    }

    /// Check everything the watcher needs before any loop starts.
    ///
    /// `require_endpoint` is false for runs that never trigger.
    pub fn validate(&self, require_endpoint: bool) -> Result<(), ConfigError> {
        self.watch_dir()?;

        if require_endpoint {
            check_url("endpoint", self.endpoint()?)?;
        }
        if let Some(url) = &self.health_url {
            check_url("health_url", url)?;
        }

        for (field, value) in [
            ("debounce", self.debounce),
            ("poll_interval", self.poll_interval),
            ("scan_interval", self.scan_interval),
            ("wait_stable", self.wait_stable),
            ("retry_base_delay", self.retry_base_delay),
            ("retry_max_delay", self.retry_max_delay),
            ("http_timeout", self.http_timeout),
            ("io_timeout", self.io_timeout),
            ("stats_interval", self.stats_interval),
            ("health_timeout", self.health_timeout),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number of seconds, got {value}"),
                });
            }
        }

        if self.retry_max_delay < self.retry_base_delay {
            return Err(ConfigError::Invalid {
                field: "retry_max_delay",
                reason: "must not be smaller than retry_base_delay".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// File filter shared by both detectors. The state database is always
    /// excluded.
    pub fn walker_config(&self) -> Result<WalkerConfig, ConfigError> {
        let db_path = self.db_path()?;
        Ok(WalkerConfig {
            follow_symlinks: self.follow_symlinks,
            skip_hidden: self.skip_hidden,
            min_size: Some(self.min_size).filter(|&size| size > 0),
            ignore_patterns: self.ignore_patterns.clone(),
            ..Default::default()
        }
        .with_allowed_extensions(&self.allowed_extensions)
        .with_exclude_dirs(self.exclude_dirs.clone())
        .with_excluded_file(&db_path))
    }

    /// Loop timings.
    #[must_use]
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            poll_interval: secs(self.poll_interval),
            scan_interval: secs(self.scan_interval),
            debounce: secs(self.debounce),
            gate: GateConfig {
                wait_stable: secs(self.wait_stable),
                max_retries: self.stability_retries,
            },
            io_timeout: secs(self.io_timeout),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: secs(self.retry_base_delay),
                max_delay: secs(self.retry_max_delay),
            },
            stats_interval: secs(self.stats_interval),
        }
    }

    /// Timeout for each trigger request.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        secs(self.http_timeout)
    }

    /// How long to wait for `health_url`.
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        secs(self.health_timeout)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("'{value}' is not a URL: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(())
}
