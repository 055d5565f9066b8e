//! Memoized existence and size of paths.
//!
//! Directories are never looked up: the root and any path whose last segment has
//! no `.` are directories by rule. Every other path gets exactly one HEAD request
//! per process lifetime; the answer is kept for the life of the mount.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusty_s3fs_common::{is_directory_key, path_to_key};
use rusty_s3fs_storage::ObjectMetadata;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::VfsError;

/// What the engine knows about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub is_dir: bool,
    /// Object size in bytes; 0 for directories and missing paths.
    pub length: u64,
    /// Last modified timestamp (Unix epoch seconds), when known.
    pub last_modified: Option<i64>,
}

impl FileStat {
    pub fn directory() -> Self {
        Self {
            exists: true,
            is_dir: true,
            length: 0,
            last_modified: None,
        }
    }

    pub fn file(length: u64) -> Self {
        Self {
            exists: true,
            is_dir: false,
            length,
            last_modified: None,
        }
    }

    pub fn missing() -> Self {
        Self {
            exists: false,
            is_dir: false,
            length: 0,
            last_modified: None,
        }
    }
}

impl From<ObjectMetadata> for FileStat {
    fn from(meta: ObjectMetadata) -> Self {
        Self {
            last_modified: meta.last_modified,
            ..Self::file(meta.size)
        }
    }
}

/// Slot holding one path's answer, locked while its HEAD request is in flight.
type StatSlot = Arc<Mutex<Option<FileStat>>>;

/// Per-path metadata, fetched once.
pub struct FileMetadataCache {
    backend: Backend,
    entries: Mutex<HashMap<(String, String), StatSlot>>,
    head_requests: AtomicU64,
}

impl FileMetadataCache {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            entries: Mutex::new(HashMap::new()),
            head_requests: AtomicU64::new(0),
        }
    }

    fn slot(&self, bucket: &str, key: &str) -> StatSlot {
        self.entries
            .lock()
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .clone()
    }

    /// Existence, kind and size of `path`.
    ///
    /// Concurrent first lookups of one path share a single HEAD request. HEAD
    /// failures are returned and not remembered, so a later call retries.
    ///
    /// # Arguments
    /// * `bucket` - Bucket the mount serves
    /// * `path` - Filesystem path (leading `/` optional)
    pub fn stat(&self, bucket: &str, path: &str) -> Result<FileStat, VfsError> {
        let key: &str = path_to_key(path);
        if is_directory_key(key) {
            return Ok(FileStat::directory());
        }

        let slot: StatSlot = self.slot(bucket, key);
        let mut cached = slot.lock();
        if let Some(stat) = *cached {
            return Ok(stat);
        }

        self.head_requests.fetch_add(1, Ordering::Relaxed);
        debug!(bucket, key, "Probing object metadata");
        let fetched = self
            .backend
            .block_on(self.backend.client().head_object(bucket, key));
        let stat: FileStat = match fetched {
            Ok(Some(meta)) => FileStat::from(meta),
            Ok(None) => FileStat::missing(),
            Err(e) => {
                warn!(bucket, key, error = %e, "Metadata lookup failed");
                return Err(VfsError::Backend(e));
            }
        };
        *cached = Some(stat);
        Ok(stat)
    }

    /// Record a file size learned elsewhere (e.g. a directory listing).
    ///
    /// Never overrides an existing answer, and ignores paths classified as
    /// directories.
    pub fn seed(&self, bucket: &str, path: &str, length: u64) {
        let key: &str = path_to_key(path);
        if is_directory_key(key) {
            return;
        }
        let slot: StatSlot = self.slot(bucket, key);
        let mut cached = slot.lock();
        if cached.is_none() {
            *cached = Some(FileStat::file(length));
        }
    }

    /// The remembered answer for `path`, without probing.
    pub fn cached(&self, bucket: &str, path: &str) -> Option<FileStat> {
        let key: &str = path_to_key(path);
        let slot: StatSlot = self
            .entries
            .lock()
            .get(&(bucket.to_string(), key.to_string()))?
            .clone();
        let stat = *slot.lock();
        stat
    }

    /// Number of backend HEAD requests issued.
    pub fn head_requests(&self) -> u64 {
        self.head_requests.load(Ordering::Relaxed)
    }
}
