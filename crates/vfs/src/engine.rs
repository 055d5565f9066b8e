//! Entry point used by the filesystem adapter.
//!
//! A `ReadEngine` serves one bucket for one mount session. It owns the
//! metadata cache, the stream pool, the optional range cache and the reaper
//! that sweeps them; dropping the engine closes every reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use rusty_s3fs_common::{
    is_directory_key, join_key, leaf_name, list_prefix, path_to_key, KEY_DELIMITER,
};
use rusty_s3fs_storage::{ListResult, StorageClient};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::VfsError;
use crate::metadata::{FileMetadataCache, FileStat};
use crate::options::VfsOptions;
use crate::range_cache::RangeCache;
use crate::reaper::{IdleSweep, Reaper};
use crate::stream_pool::StreamPool;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    /// Object size; 0 for directories.
    pub size: u64,
}

/// Totals over every `read` call since the engine started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub reads: u64,
    pub failed: u64,
    pub bytes: u64,
    /// Summed wall time of all reads.
    pub total_latency: Duration,
}

#[derive(Debug, Default)]
struct ReadCounters {
    reads: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    micros: AtomicU64,
}

/// Remote random-access read engine for one bucket.
pub struct ReadEngine {
    _reaper: Reaper,
    bucket: String,
    backend: Backend,
    options: VfsOptions,
    metadata: FileMetadataCache,
    pool: Arc<StreamPool>,
    range_cache: Option<Arc<RangeCache>>,
    counters: ReadCounters,
}

impl ReadEngine {
    /// Build an engine and start its reaper.
    ///
    /// # Arguments
    /// * `client` - Object store client
    /// * `runtime` - Runtime that drives `client`; engine calls must come from
    ///   threads outside it
    /// * `bucket` - Bucket to serve
    /// * `options` - Engine configuration
    pub fn new(
        client: Arc<dyn StorageClient>,
        runtime: Handle,
        bucket: impl Into<String>,
        options: VfsOptions,
    ) -> Result<Self, VfsError> {
        options.validate()?;
        let bucket: String = bucket.into();
        let backend = Backend::new(client, runtime);

        let pool: Arc<StreamPool> = Arc::new(StreamPool::new(backend.clone(), &options));
        let range_cache: Option<Arc<RangeCache>> = options
            .range_cache
            .enabled
            .then(|| Arc::new(RangeCache::new(&options.range_cache)));

        let pool_target: Weak<dyn IdleSweep> = Arc::downgrade(&pool) as Weak<dyn IdleSweep>;
        let mut targets: Vec<Weak<dyn IdleSweep>> = vec![pool_target];
        if let Some(ref cache) = range_cache {
            targets.push(Arc::downgrade(cache) as Weak<dyn IdleSweep>);
        }
        let reaper = Reaper::spawn(options.pool.reap_interval(), targets)?;

        info!(
            bucket = %bucket,
            block_size = options.stream.block_size,
            read_ahead = options.stream.read_ahead_size,
            range_cache = range_cache.is_some(),
            "Read engine started"
        );

        Ok(Self {
            _reaper: reaper,
            metadata: FileMetadataCache::new(backend.clone()),
            bucket,
            backend,
            options,
            pool,
            range_cache,
            counters: ReadCounters::default(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn options(&self) -> &VfsOptions {
        &self.options
    }

    pub fn pool(&self) -> &StreamPool {
        &self.pool
    }

    pub fn range_cache(&self) -> Option<&RangeCache> {
        self.range_cache.as_deref()
    }

    pub fn metadata(&self) -> &FileMetadataCache {
        &self.metadata
    }

    pub fn read_stats(&self) -> ReadStats {
        ReadStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.counters.micros.load(Ordering::Relaxed)),
        }
    }

    /// Existence, kind and size of `path`.
    pub fn stat(&self, path: &str) -> Result<FileStat, VfsError> {
        self.metadata.stat(&self.bucket, path)
    }

    /// Read up to `length` bytes of `path` starting at `offset`.
    ///
    /// # Returns
    /// * Exactly `min(length, file_length - offset)` bytes
    /// * Empty when `offset` is at or past end of file
    /// * `Err(NotFound)` / `Err(IsDirectory)` for paths that cannot be read
    /// * `Err(ShortRead)`, `Err(StreamFailed)` or `Err(Timeout)` when the
    ///   bytes could not be fetched; fewer bytes are never returned as success
    pub fn read(&self, path: &str, offset: u64, length: usize) -> Result<Bytes, VfsError> {
        let started: Instant = Instant::now();
        let result: Result<Bytes, VfsError> = self.read_inner(path, offset, length);
        let elapsed: Duration = started.elapsed();

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        self.counters
            .micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        match &result {
            Ok(bytes) => {
                self.counters
                    .bytes
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                debug!(
                    path,
                    offset,
                    length,
                    returned = bytes.len(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "Read served"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    path,
                    offset,
                    length,
                    error = %e,
                    elapsed_us = elapsed.as_micros() as u64,
                    "Read failed"
                );
            }
        }
        result
    }

    fn read_inner(&self, path: &str, offset: u64, length: usize) -> Result<Bytes, VfsError> {
        let stat: FileStat = self.stat(path)?;
        if !stat.exists {
            return Err(VfsError::NotFound {
                path: path.to_string(),
            });
        }
        if stat.is_dir {
            return Err(VfsError::IsDirectory {
                path: path.to_string(),
            });
        }
        if length == 0 || offset >= stat.length {
            return Ok(Bytes::new());
        }

        let wanted: usize = (length as u64).min(stat.length - offset) as usize;
        let key: &str = path_to_key(path);
        let end: u64 = offset + wanted as u64;
        let mut parts: Vec<Bytes> = Vec::new();
        let mut cursor: u64 = offset;

        while cursor < end {
            let remaining: usize = (end - cursor) as usize;

            if let Some(ref cache) = self.range_cache {
                if let Some(hit) = cache.lookup(key, cursor, remaining) {
                    let bytes: Bytes = hit.into_bytes();
                    debug!(key, offset = cursor, len = bytes.len(), "Range cache hit");
                    cursor += bytes.len() as u64;
                    parts.push(bytes);
                    continue;
                }
            }

            let fetched: Bytes = self.fetch(key, cursor, remaining)?;
            if fetched.is_empty() {
                break;
            }
            if let Some(ref cache) = self.range_cache {
                cache.insert(key, cursor, fetched.clone());
            }
            cursor += fetched.len() as u64;
            parts.push(fetched);
        }

        if cursor < end {
            let actual: usize = (cursor - offset) as usize;
            warn!(key, offset, expected = wanted, actual, "Short read below end of file");
            return Err(VfsError::ShortRead {
                path: path.to_string(),
                offset,
                expected: wanted,
                actual,
            });
        }

        Ok(concat(parts, wanted))
    }

    /// Read from a pooled reader, retrying once on a fresh reader when the
    /// routed one can no longer serve the offset, or retired itself after
    /// timing out without progress.
    ///
    /// # Returns
    /// A non-empty prefix of the requested bytes, or empty when the object
    /// ends before `offset`.
    fn fetch(&self, key: &str, offset: u64, length: usize) -> Result<Bytes, VfsError> {
        let mut reader = self.pool.get(&self.bucket, key, offset, length)?;
        let mut retried: bool = false;
        loop {
            let result: Result<Bytes, VfsError> = reader.read_range(offset, length);
            let retry: bool = match &result {
                Err(VfsError::Evicted { .. }) => true,
                Err(VfsError::Timeout { .. }) => reader.is_closed(),
                Ok(bytes) => {
                    bytes.len() < length && reader.is_closed() && reader.failure().is_none()
                }
                Err(_) => false,
            };
            if retry && !retried {
                debug!(reader = reader.id(), key, offset, "Retrying on a fresh reader");
                retried = true;
                reader = self.pool.open_fresh(&self.bucket, key, offset)?;
                continue;
            }

            return match result {
                Ok(bytes) if bytes.is_empty() => match reader.failure() {
                    Some(message) => Err(VfsError::StreamFailed { message }),
                    None => Ok(bytes),
                },
                other => other,
            };
        }
    }

    /// Entries directly under the directory `path`.
    ///
    /// Common prefixes become directories and objects become files, named by
    /// their last segment. The prefix's own marker object is skipped. Listed
    /// file sizes seed the metadata cache.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let prefix: String = list_prefix(path);
        let delimiter: String = KEY_DELIMITER.to_string();
        let listing: ListResult = self.backend.block_on(self.backend.client().list_objects(
            &self.bucket,
            &prefix,
            Some(&delimiter),
        ))?;

        let mut entries: Vec<DirEntry> =
            Vec::with_capacity(listing.common_prefixes.len() + listing.objects.len());
        for common in &listing.common_prefixes {
            let name: &str = leaf_name(common);
            if name.is_empty() {
                continue;
            }
            entries.push(DirEntry {
                name: name.to_string(),
                is_dir: true,
                size: 0,
            });
        }
        for object in &listing.objects {
            if object.key == prefix {
                continue;
            }
            let name: &str = leaf_name(&object.key);
            if name.is_empty() {
                continue;
            }
            let is_dir: bool = is_directory_key(name);
            if !is_dir {
                self.metadata
                    .seed(&self.bucket, &join_key(&prefix, name), object.size);
            }
            entries.push(DirEntry {
                name: name.to_string(),
                is_dir,
                size: if is_dir { 0 } else { object.size },
            });
        }

        debug!(path, entries = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Close every pooled reader.
    pub fn shutdown(&self) {
        self.pool.close_all();
    }
}

/// Join `parts` into one buffer of `len` bytes, without copying a single part.
fn concat(mut parts: Vec<Bytes>, len: usize) -> Bytes {
    if parts.len() == 1 {
        return parts.remove(0);
    }
    let mut out = BytesMut::with_capacity(len);
    for part in &parts {
        out.extend_from_slice(part);
    }
    out.freeze()
}
