//! Accessor contract for the encrypted storage backend.
//!
//! The coalescer only ever needs to fetch whole files and directory
//! listings, so that narrow view gets its own trait ([`Backend`]); the
//! facade additionally stats paths directly ([`FsAccessor`]). A single
//! backend implementation normally provides both.

use std::time::SystemTime;

use thiserror::Error;

/// A directory entry (or stat result) as reported by the backend.
///
/// Carries the attributes the plaintext view preserves verbatim (mode,
/// mtime) next to the two it rewrites (name, size).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Entry name, without any leading path.
    pub name: String,
    /// Size in bytes as stored on the backend (ciphertext size).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Unix permission bits.
    pub mode: u32,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileEntry {
    /// Re-label this entry with a plaintext name and projected plaintext
    /// size, keeping every other attribute.
    pub fn with_plaintext(&self, name: impl Into<String>, size: u64) -> FileEntry {
        FileEntry {
            name: name.into(),
            size,
            ..self.clone()
        }
    }
}

/// Failure reported by a backend operation.
///
/// Cloneable by construction: a single failure is stored in a cache entry
/// and handed to every caller waiting on the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not complete an I/O operation.
    #[error("backend i/o error on {path}: {message}")]
    Io { path: String, message: String },
    /// The path does not exist on the backend.
    #[error("{0}: not found")]
    NotFound(String),
    /// No connection to the backend could be obtained.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Wrap an [`std::io::Error`] for the given path.
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> BackendError {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotFound(path)
        } else {
            BackendError::Io {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Whole-file and listing access, as consumed by the request coalescer.
pub trait Backend: Send + Sync {
    /// Read the entire file at `path`.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError>;

    /// List the immediate children of the directory at `path`.
    fn read_dir(&self, path: &str) -> Result<Vec<FileEntry>, BackendError>;
}

/// Full accessor contract: everything the facade needs.
pub trait FsAccessor: Backend {
    /// Stat the entry at `path`.
    fn stat(&self, path: &str) -> Result<FileEntry, BackendError>;
}
