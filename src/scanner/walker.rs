//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! [`Walker`] lists the watch root with the shared [`WalkerConfig`] filter.
//! It offers two views of the tree:
//!
//! - [`Walker::candidates`] yields paths that pass the name-based filters
//!   without touching file metadata. The checksum scanner uses it so that
//!   every stat happens later under its own per-file timeout.
//! - [`Walker::walk`] additionally stats each candidate and yields a
//!   [`FileEntry`]. The poll observer uses it for its cheap size/mtime
//!   snapshot.
//!
//! Excluded and hidden directories are pruned while reading the parent,
//! so their contents are never listed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::path_utils::relative_key;
use super::{FileEntry, ScanError, WalkerConfig};

/// Directory walker for parallel file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Gitignore-style matcher built from `config.ignore_patterns`
    ignore: Option<Gitignore>,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        let ignore = build_ignore(path, &config.ignore_patterns);
        Self {
            root: path.to_path_buf(),
            config,
            ignore,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops iteration as soon
    /// as possible.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Root directory being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filter in use.
    #[must_use]
    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn is_ignored(&self, key: &str) -> bool {
        self.ignore
            .as_ref()
            .is_some_and(|gi| gi.matched_path_or_any_parents(key, false).is_ignore())
    }

    /// Yield every file path that passes the name-based filters.
    ///
    /// No metadata is read beyond what the directory listing provides.
    pub fn candidates(&self) -> impl Iterator<Item = Result<PathBuf, ScanError>> + '_ {
        let prune = self.config.clone();

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(false)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                children.retain(|child| match child {
                    Ok(entry) if entry.file_type().is_dir() => {
                        !prune.excludes_dir(&entry.file_name().to_string_lossy())
                    }
                    _ => true,
                });
                // Sort children for deterministic output
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().map_while(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: shutdown requested, stopping iteration");
                return None;
            }
            Some(entry_result)
        }).filter_map(move |entry_result| match entry_result {
            Ok(entry) => {
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    return None;
                }
                if file_type.is_symlink() && !self.config.follow_symlinks {
                    log::trace!("Skipping symlink: {}", entry.path().display());
                    return None;
                }

                let path = entry.path();
                if !self.config.accepts_name(&path) {
                    return None;
                }
                let key = relative_key(&self.root, &path)?;
                if self.is_ignored(&key) {
                    log::trace!("Ignoring file: {}", key);
                    return None;
                }
                Some(Ok(path))
            }
            Err(e) => {
                let path = e
                    .path()
                    .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                log::warn!("Walker error for {}: {}", path.display(), e);
                Some(Err(ScanError::Io {
                    path,
                    source: std::io::Error::other(e.to_string()),
                }))
            }
        })
    }

    /// Walk the directory tree, yielding stat'ed file entries.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration, so one unreadable file never hides the rest of the tree.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileEntry, ScanError>> + '_ {
        self.candidates().filter_map(move |candidate| match candidate {
            Ok(path) => self.stat(&path).transpose(),
            Err(e) => Some(Err(e)),
        })
    }

    /// Stat a single candidate path.
    ///
    /// Returns `Ok(None)` when the path is not a regular file or fails the
    /// size filter.
    pub fn stat(&self, path: &Path) -> Result<Option<FileEntry>, ScanError> {
        let metadata = if self.config.follow_symlinks {
            std::fs::metadata(path)
        } else {
            std::fs::symlink_metadata(path)
        };
        let metadata = metadata.map_err(|e| ScanError::from_io(path, e))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        let size = metadata.len();
        if !self.config.accepts_size(size) {
            log::trace!(
                "Skipping file due to size filter ({}): {}",
                size,
                path.display()
            );
            return Ok(None);
        }

        let Some(key) = relative_key(&self.root, path) else {
            return Ok(None);
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Ok(Some(FileEntry::new(path.to_path_buf(), key, size, modified)))
    }
}

/// Build a gitignore-style matcher rooted at the watch directory.
fn build_ignore(root: &Path, patterns: &[String]) -> Option<Gitignore> {
    if patterns.is_empty() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        if let Err(e) = builder.add_line(None, pattern) {
            log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
        }
    }

    match builder.build() {
        Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Failed to build ignore patterns: {}", e);
            None
        }
    }
}
