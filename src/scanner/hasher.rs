//! BLAKE3 file hasher with streaming support.
//!
//! # Overview
//! [`Hasher`] computes BLAKE3 digests of file contents using a fixed-size
//! read buffer. Files are never memory-mapped: on NFS a concurrent
//! truncate of a mapped file raises `SIGBUS`, while a plain read simply
//! returns a short or torn result that the next pass corrects.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::HashError;

/// A 256-bit BLAKE3 digest.
pub type Hash = [u8; 32];

/// Default read buffer size (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Streaming content hasher.
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Use a different read buffer size. Values below 4 KiB are raised to 4 KiB.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(4096);
        self
    }

    /// Hash the complete contents of `path`.
    pub fn full_hash(&self, path: &Path) -> Result<Hash, HashError> {
        let file = File::open(path).map_err(|e| map_io_error(path, e))?;
        self.hash_reader(file).map_err(|e| map_io_error(path, e))
    }

    /// Hash everything `reader` yields. Interrupted reads are retried.
    pub fn hash_reader<R: Read>(&self, reader: R) -> io::Result<Hash> {
        let mut reader = BufReader::with_capacity(self.buffer_size, reader);
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(*hasher.finalize().as_bytes())
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn hash_bytes(&self, data: &[u8]) -> Hash {
        *blake3::hash(data).as_bytes()
    }
}

fn map_io_error(path: &Path, error: std::io::Error) -> HashError {
    match error.kind() {
        std::io::ErrorKind::NotFound => HashError::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => HashError::PermissionDenied(path.to_path_buf()),
        _ => HashError::Io {
            path: path.to_path_buf(),
            source: error,
        },
    }
}

/// Encode a digest as lowercase hex.
#[must_use]
pub fn hash_to_hex(hash: &Hash) -> String {
    blake3::Hash::from_bytes(*hash).to_hex().to_string()
}
