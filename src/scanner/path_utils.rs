//! Store keys for watched paths.
//!
//! Every tracked file is keyed by its path relative to the watch root,
//! joined with `/` and normalized to Unicode NFC. NFS exports shared with
//! macOS clients routinely contain NFD names, and the same document must
//! map to the same key no matter which client wrote it or which platform
//! the watcher runs on.
//!
//! # Example
//!
//! ```
//! use docwatch::scanner::path_utils::{relative_key, resolve_key};
//! use std::path::Path;
//!
//! let root = Path::new("/srv/docs");
//! let key = relative_key(root, Path::new("/srv/docs/guides/cafe\u{0301}.md")).unwrap();
//! assert_eq!(key, "guides/café.md");
//! assert_eq!(resolve_key(root, &key), Path::new("/srv/docs/guides/café.md"));
//! ```

use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Normalize a key string to NFC (Composed) form.
#[must_use]
pub fn normalize_key(s: &str) -> String {
    s.nfc().collect()
}

/// Build the store key for `path` relative to `root`.
///
/// Returns `None` when `path` is not inside `root`, is the root itself,
/// or contains a `..` component after stripping the prefix.
#[must_use]
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(normalize_key(&parts.join("/")))
}

/// Turn a store key back into an absolute path under `root`.
#[must_use]
pub fn resolve_key(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Check if a string is already in NFC form.
#[must_use]
pub fn is_nfc(s: &str) -> bool {
    unicode_normalization::is_nfc(s)
}
