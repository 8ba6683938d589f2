//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Parallel directory walking using jwalk, with the watch filter applied
//! - Content hashing with BLAKE3
//! - Unicode-normalized store keys
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`hasher`]: BLAKE3 file hashing (streaming)
//! - [`path_utils`]: Relative, NFC-normalized store keys
//!
//! The same [`WalkerConfig`] is shared by the poll observer and the
//! checksum scanner so both detectors agree on which files are watched.
//!
//! # Example
//!
//! ```no_run
//! use docwatch::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig {
//!     allowed_extensions: vec!["md".to_string(), "pdf".to_string()],
//!     skip_hidden: true,
//!     ..Default::default()
//! };
//!
//! let walker = Walker::new(Path::new("/srv/docs"), config);
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.key, file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod path_utils;
pub mod walker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

// Re-export main types
pub use hasher::{hash_to_hex, Hash, Hasher};
pub use walker::Walker;

/// Metadata for a discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Store key: path relative to the watch root, NFC-normalized
    pub key: String,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: PathBuf, key: String, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            key,
            size,
            modified,
        }
    }
}

/// Filter shared by every component that lists the watch root.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`) as well
    /// as editor temp files (names starting or ending with `~`).
    pub skip_hidden: bool,

    /// Minimum file size to include (in bytes).
    pub min_size: Option<u64>,

    /// Lowercase extensions without the leading dot. Empty admits every
    /// extension.
    pub allowed_extensions: Vec<String>,

    /// Directory names pruned wherever they appear in the tree.
    pub exclude_dirs: Vec<String>,

    /// Glob patterns to ignore (gitignore-style), matched against store keys.
    pub ignore_patterns: Vec<String>,

    /// Absolute paths that are never reported, such as the state database.
    pub excluded_files: HashSet<PathBuf>,
}

impl WalkerConfig {
    /// Set the allowed extensions. Leading dots and case are normalized.
    #[must_use]
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    /// Set the directory names to prune.
    #[must_use]
    pub fn with_exclude_dirs(mut self, dirs: Vec<String>) -> Self {
        self.exclude_dirs = dirs;
        self
    }

    /// Never report `path`, nor the SQLite sidecar files next to it.
    #[must_use]
    pub fn with_excluded_file(mut self, path: &Path) -> Self {
        self.excluded_files.insert(path.to_path_buf());
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            self.excluded_files.insert(PathBuf::from(sidecar));
        }
        self
    }

    /// Whether a file name passes the hidden/temp and extension filters.
    #[must_use]
    pub fn accepts_name(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        if self.skip_hidden && (name.starts_with('.') || name.starts_with('~') || name.ends_with('~'))
        {
            return false;
        }
        if self.excluded_files.contains(path) {
            return false;
        }
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.allowed_extensions.iter().any(|ext| *ext == extension)
    }

    /// Whether a file of `size` bytes passes the minimum size filter.
    #[must_use]
    pub fn accepts_size(&self, size: u64) -> bool {
        self.min_size.map_or(true, |min| size >= min)
    }

    /// Whether a directory name is pruned.
    #[must_use]
    pub fn excludes_dir(&self, name: &str) -> bool {
        (self.skip_hidden && name.starts_with('.')) || self.exclude_dirs.iter().any(|d| d == name)
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// A stat or read did not complete within the I/O timeout.
    #[error("Timed out after {timeout:?}: {path}")]
    Timeout {
        /// Path that stalled
        path: PathBuf,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// Hashing the file failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Map an I/O error on `path` into the matching variant.
    pub fn from_io(path: &Path, error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// The path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) => p,
            Self::Timeout { path, .. } | Self::Io { path, .. } => path,
            Self::Hash(HashError::NotFound(p) | HashError::PermissionDenied(p)) => p,
            Self::Hash(HashError::Io { path, .. }) => path,
        }
    }

    /// True when the file vanished between listing and access.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Hash(HashError::NotFound(_))
        )
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
