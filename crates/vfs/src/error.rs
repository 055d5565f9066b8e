//! Error types for the VFS crate.

use std::time::Duration;

use rusty_s3fs_storage::StorageError;
use thiserror::Error;

/// Errors that can occur during VFS operations.
#[derive(Error, Debug)]
pub enum VfsError {
    /// Path does not name an object or directory.
    #[error("No such file: {path}")]
    NotFound { path: String },

    /// Read on a directory.
    #[error("Is a directory: {path}")]
    IsDirectory { path: String },

    /// Bytes were not buffered before the read deadline.
    #[error("Timed out after {waited:?} waiting for {path} at offset {offset}")]
    Timeout {
        path: String,
        offset: u64,
        waited: Duration,
    },

    /// Backend failure surfaced to the caller.
    #[error("Backend error: {0}")]
    Backend(#[from] StorageError),

    /// Stream reader gave up after repeated backend failures.
    #[error("Stream failed: {message}")]
    StreamFailed { message: String },

    /// Fewer bytes than requested were available below end of file.
    #[error("Short read on {path} at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        path: String,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// Requested offset has already been dropped from a reader's window.
    #[error("Offset {offset} already evicted from stream buffer")]
    Evicted { offset: u64 },

    /// Write access requested on a read-only mount.
    #[error("Read-only filesystem")]
    ReadOnly,

    /// Option values that cannot work together.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Mount operation failed.
    #[error("Mount failed: {0}")]
    MountFailed(String),

    /// Background thread could not be started.
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

impl VfsError {
    /// POSIX error code reported to the filesystem caller.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound { .. } => libc::ENOENT,
            VfsError::IsDirectory { .. } => libc::EISDIR,
            VfsError::ReadOnly => libc::EROFS,
            VfsError::InvalidOptions(_) => libc::EINVAL,
            VfsError::Backend(StorageError::NotFound { .. }) => libc::ENOENT,
            VfsError::Backend(StorageError::AccessDenied { .. }) => libc::EACCES,
            VfsError::Timeout { .. }
            | VfsError::Backend(_)
            | VfsError::StreamFailed { .. }
            | VfsError::ShortRead { .. }
            | VfsError::Evicted { .. }
            | VfsError::MountFailed(_)
            | VfsError::ThreadSpawn(_) => libc::EIO,
        }
    }
}
