//! Routing of reads onto pooled stream readers.
//!
//! Per object, the pool keeps a set of [`StreamReader`]s. A read is routed by,
//! in order:
//!
//! 1. A reader whose buffered span plus read-ahead window covers the offset.
//!    Sequential scans keep landing on the same reader this way.
//! 2. A live reader whose write cursor trails the offset by less than the
//!    reuse threshold. Its fill loop catches up faster than a new connection
//!    would open. The closest such reader wins.
//! 3. A new reader opened at the offset.
//!
//! Selection and creation happen under the pool lock, and the chosen reader
//! is stamped before the lock is released, so a sweep cannot reap a reader a
//! caller has just been handed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::VfsError;
use crate::options::{StreamOptions, VfsOptions};
use crate::reaper::IdleSweep;
use crate::stream_reader::StreamReader;

/// Bucket and key of a backend object.
type ObjectId = (String, String);

/// Counters describing pool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects with at least one reader.
    pub objects: usize,
    /// Readers currently pooled.
    pub readers: usize,
    /// Readers opened over the pool's lifetime.
    pub readers_opened: u64,
    /// Reads routed by window containment.
    pub window_hits: u64,
    /// Reads routed to a trailing reader.
    pub skip_ahead_hits: u64,
    /// Readers closed by idle sweeps.
    pub reaped: u64,
}

/// Per-object sets of stream readers.
pub struct StreamPool {
    backend: Backend,
    stream_options: StreamOptions,
    idle_timeout: Duration,
    reuse_threshold: u64,
    readers: Mutex<HashMap<ObjectId, Vec<Arc<StreamReader>>>>,
    next_id: AtomicU64,
    readers_opened: AtomicU64,
    window_hits: AtomicU64,
    skip_ahead_hits: AtomicU64,
    reaped: AtomicU64,
}

impl StreamPool {
    /// Create an empty pool.
    ///
    /// # Arguments
    /// * `backend` - Storage client and runtime for new readers
    /// * `options` - Stream and pool configuration
    pub fn new(backend: Backend, options: &VfsOptions) -> Self {
        Self {
            backend,
            stream_options: options.stream.clone(),
            idle_timeout: options.pool.idle_timeout(),
            reuse_threshold: options.reuse_threshold(),
            readers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            readers_opened: AtomicU64::new(0),
            window_hits: AtomicU64::new(0),
            skip_ahead_hits: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
        }
    }

    /// Select or create a reader for a read at `offset`.
    ///
    /// # Arguments
    /// * `bucket` - Bucket holding the object
    /// * `key` - Object key
    /// * `offset` - First byte of the read
    /// * `length` - Bytes wanted
    pub fn get(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: usize,
    ) -> Result<Arc<StreamReader>, VfsError> {
        let mut readers = self.readers.lock();
        let entry: &mut Vec<Arc<StreamReader>> = readers
            .entry((bucket.to_string(), key.to_string()))
            .or_default();
        entry.retain(|r| !r.is_spent());

        if let Some(reader) = entry.iter().find(|r| r.within(offset)) {
            reader.touch();
            self.window_hits.fetch_add(1, Ordering::Relaxed);
            debug!(reader = reader.id(), key, offset, length, "Routed read to covering reader");
            return Ok(reader.clone());
        }

        let trailing: Option<&Arc<StreamReader>> = entry
            .iter()
            .filter_map(|r| r.trails(offset, self.reuse_threshold).map(|gap| (gap, r)))
            .min_by_key(|(gap, _)| *gap)
            .map(|(_, r)| r);
        if let Some(reader) = trailing {
            reader.touch();
            self.skip_ahead_hits.fetch_add(1, Ordering::Relaxed);
            debug!(reader = reader.id(), key, offset, length, "Routed read to trailing reader");
            return Ok(reader.clone());
        }

        let reader: Arc<StreamReader> = Arc::new(self.open_reader(bucket, key, offset)?);
        entry.push(reader.clone());
        Ok(reader)
    }

    /// Open a new reader at `offset` regardless of existing ones.
    ///
    /// Used when a routed reader can no longer serve the offset.
    pub fn open_fresh(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
    ) -> Result<Arc<StreamReader>, VfsError> {
        let mut readers = self.readers.lock();
        let reader: Arc<StreamReader> = Arc::new(self.open_reader(bucket, key, offset)?);
        readers
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .push(reader.clone());
        Ok(reader)
    }

    fn open_reader(&self, bucket: &str, key: &str, offset: u64) -> Result<StreamReader, VfsError> {
        let id: u64 = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reader = StreamReader::open(
            id,
            self.backend.clone(),
            bucket,
            key,
            offset,
            self.stream_options.clone(),
        )?;
        reader.touch();
        self.readers_opened.fetch_add(1, Ordering::Relaxed);
        Ok(reader)
    }

    /// Number of pooled readers for one object.
    pub fn readers_for(&self, bucket: &str, key: &str) -> usize {
        self.readers
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map_or(0, |v| v.len())
    }

    pub fn stats(&self) -> PoolStats {
        let readers = self.readers.lock();
        PoolStats {
            objects: readers.values().filter(|v| !v.is_empty()).count(),
            readers: readers.values().map(|v| v.len()).sum(),
            readers_opened: self.readers_opened.load(Ordering::Relaxed),
            window_hits: self.window_hits.load(Ordering::Relaxed),
            skip_ahead_hits: self.skip_ahead_hits.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }

    /// Close and remove every reader.
    pub fn close_all(&self) {
        let drained: Vec<Arc<StreamReader>> = self
            .readers
            .lock()
            .drain()
            .flat_map(|(_, readers)| readers)
            .collect();
        let count: usize = drained.len();
        for reader in drained {
            reader.close();
        }
        if count > 0 {
            info!(readers = count, "Closed all stream readers");
        }
    }
}

impl IdleSweep for StreamPool {
    fn sweep_idle(&self, now: Instant) -> usize {
        let mut removed: Vec<Arc<StreamReader>> = Vec::new();
        {
            let mut readers = self.readers.lock();
            for set in readers.values_mut() {
                let mut kept: Vec<Arc<StreamReader>> = Vec::with_capacity(set.len());
                for reader in set.drain(..) {
                    if reader.is_spent() || reader.idle_for(now) > self.idle_timeout {
                        removed.push(reader);
                    } else {
                        kept.push(reader);
                    }
                }
                *set = kept;
            }
            readers.retain(|_, set| !set.is_empty());
        }
        for reader in &removed {
            debug!(reader = reader.id(), key = reader.key(), "Reaping idle reader");
            reader.close();
        }
        self.reaped
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed.len()
    }
}

impl Drop for StreamPool {
    fn drop(&mut self) {
        self.close_all();
    }
}
