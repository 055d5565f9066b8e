//! In-process `StorageClient` for tests and local demos.
//!
//! Objects live in a `bucket -> key -> bytes` map. The client can be told to
//! misbehave (stall, fail, return empty chunks) so callers can exercise their
//! recovery paths without a network.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rusty_s3fs_common::IO_BUFFER_SIZE;
use tokio::sync::Notify;

use crate::error::StorageError;
use crate::traits::{RangeStream, StorageClient};
use crate::types::{ByteRange, ListResult, ObjectInfo, ObjectMetadata};

/// In-memory object store.
///
/// Cloning yields another handle to the same store and counters.
#[derive(Clone, Default)]
pub struct MemoryStorageClient {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    buckets: RwLock<HashMap<String, BTreeMap<String, Bytes>>>,
    /// Max bytes per `read_chunk`; 0 means IO_BUFFER_SIZE.
    chunk_size: AtomicUsize,
    stalled: AtomicBool,
    stall_released: Notify,
    fail_next_reads: AtomicU32,
    fail_next_opens: AtomicU32,
    fail_next_heads: AtomicU32,
    zero_next_reads: AtomicU32,
    head_requests: AtomicU64,
    streams_opened: AtomicU64,
    open_streams: AtomicUsize,
    list_requests: AtomicU64,
    bytes_served: AtomicU64,
}

/// Decrement `counter` if positive. Returns true if it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryStorageClient {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how many bytes each `read_chunk` may return.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.inner.chunk_size.store(chunk_size, Ordering::SeqCst);
        self
    }

    /// Store an object, replacing any previous content.
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.inner
            .buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
    }

    /// Create a bucket with no objects.
    pub fn create_bucket(&self, bucket: &str) {
        self.inner
            .buckets
            .write()
            .entry(bucket.to_string())
            .or_default();
    }

    /// When stalled, open streams never deliver a byte until released.
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
        if !stalled {
            self.inner.stall_released.notify_waiters();
        }
    }

    /// Fail the next `n` chunk reads with a retryable network error.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.fail_next_reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` stream opens with a retryable network error.
    pub fn fail_next_opens(&self, n: u32) {
        self.inner.fail_next_opens.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` HEAD requests with a retryable network error.
    pub fn fail_next_heads(&self, n: u32) {
        self.inner.fail_next_heads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` chunk reads return zero bytes.
    pub fn zero_next_reads(&self, n: u32) {
        self.inner.zero_next_reads.store(n, Ordering::SeqCst);
    }

    /// Number of HEAD requests issued.
    pub fn head_requests(&self) -> u64 {
        self.inner.head_requests.load(Ordering::SeqCst)
    }

    /// Number of range streams opened successfully.
    pub fn streams_opened(&self) -> u64 {
        self.inner.streams_opened.load(Ordering::SeqCst)
    }

    /// Number of range stream handles currently alive.
    pub fn open_streams(&self) -> usize {
        self.inner.open_streams.load(Ordering::SeqCst)
    }

    /// Number of listings issued.
    pub fn list_requests(&self) -> u64 {
        self.inner.list_requests.load(Ordering::SeqCst)
    }

    /// Total bytes delivered through range streams.
    pub fn bytes_served(&self) -> u64 {
        self.inner.bytes_served.load(Ordering::SeqCst)
    }

    fn lookup(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        self.inner.head_requests.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.inner.fail_next_heads) {
            return Err(StorageError::transient("injected head failure"));
        }
        Ok(self
            .lookup(bucket, key)
            .map(|data| ObjectMetadata::with_size(data.len() as u64)))
    }

    async fn open_range_stream(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> Result<Box<dyn RangeStream>, StorageError> {
        if take_one(&self.inner.fail_next_opens) {
            return Err(StorageError::transient("injected open failure"));
        }
        let data: Bytes = self
            .lookup(bucket, key)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        let len: u64 = data.len() as u64;
        let start: u64 = range.start.min(len);
        let end: u64 = range.end.unwrap_or(len).clamp(start, len);

        self.inner.streams_opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryRangeStream {
            inner: self.inner.clone(),
            remaining: data.slice(start as usize..end as usize),
        }))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<ListResult, StorageError> {
        self.inner.list_requests.fetch_add(1, Ordering::SeqCst);
        let buckets = self.inner.buckets.read();
        let objects: &BTreeMap<String, Bytes> =
            buckets.get(bucket).ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: prefix.to_string(),
            })?;

        let mut result = ListResult::default();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        for (key, data) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            let grouped: Option<usize> = delimiter
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|idx| idx + d.len()));
            match grouped {
                Some(cut) => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..cut]));
                }
                None => result.objects.push(ObjectInfo {
                    key: key.clone(),
                    size: data.len() as u64,
                    last_modified: None,
                }),
            }
        }
        result.common_prefixes = prefixes.into_iter().collect();
        Ok(result)
    }
}

struct MemoryRangeStream {
    inner: Arc<MemoryInner>,
    remaining: Bytes,
}

#[async_trait]
impl RangeStream for MemoryRangeStream {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, StorageError> {
        loop {
            let released = self.inner.stall_released.notified();
            if !self.inner.stalled.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }

        if take_one(&self.inner.fail_next_reads) {
            return Err(StorageError::transient("injected read failure"));
        }
        if take_one(&self.inner.zero_next_reads) {
            return Ok(Some(Bytes::new()));
        }
        if self.remaining.is_empty() {
            return Ok(None);
        }

        let configured: usize = match self.inner.chunk_size.load(Ordering::SeqCst) {
            0 => IO_BUFFER_SIZE,
            n => n,
        };
        let n: usize = max_len.min(configured).min(self.remaining.len()).max(1);
        let chunk: Bytes = self.remaining.split_to(n);
        self.inner
            .bytes_served
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(Some(chunk))
    }
}

impl Drop for MemoryRangeStream {
    fn drop(&mut self) {
        self.inner.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn drain(stream: &mut Box<dyn RangeStream>, max_len: usize) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.read_chunk(max_len).await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_head_object() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "dir/a.bin", sample(100));

        let meta = client.head_object("b", "dir/a.bin").await.unwrap();
        assert_eq!(meta.map(|m| m.size), Some(100));
        assert!(client.head_object("b", "missing.bin").await.unwrap().is_none());
        assert!(client.head_object("nobucket", "a").await.unwrap().is_none());
        assert_eq!(client.head_requests(), 3);
    }

    #[tokio::test]
    async fn test_range_stream_bounded() {
        let data = sample(1000);
        let client = MemoryStorageClient::new().with_chunk_size(64);
        client.put_object("b", "k.bin", data.clone());

        let mut stream = client
            .open_range_stream("b", "k.bin", ByteRange::bounded(100, 300))
            .await
            .unwrap();
        let first = stream.read_chunk(1024).await.unwrap().unwrap();
        assert_eq!(first.len(), 64);
        let mut all = first.to_vec();
        all.extend(drain(&mut stream, 1024).await);
        assert_eq!(all, data[100..300]);
    }

    #[tokio::test]
    async fn test_range_stream_open_ended_past_eof() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "k.bin", sample(10));

        let mut stream = client
            .open_range_stream("b", "k.bin", ByteRange::from_offset(50))
            .await
            .unwrap();
        assert!(stream.read_chunk(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_missing_object() {
        let client = MemoryStorageClient::new();
        let result = client
            .open_range_stream("b", "nope.bin", ByteRange::from_offset(0))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert_eq!(client.streams_opened(), 0);
    }

    #[tokio::test]
    async fn test_open_streams_counter_tracks_drop() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "k.bin", sample(10));

        let s1 = client
            .open_range_stream("b", "k.bin", ByteRange::from_offset(0))
            .await
            .unwrap();
        let s2 = client
            .open_range_stream("b", "k.bin", ByteRange::from_offset(5))
            .await
            .unwrap();
        assert_eq!(client.open_streams(), 2);
        drop(s1);
        assert_eq!(client.open_streams(), 1);
        drop(s2);
        assert_eq!(client.open_streams(), 0);
        assert_eq!(client.streams_opened(), 2);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "k.bin", sample(10));

        client.fail_next_opens(1);
        assert!(client
            .open_range_stream("b", "k.bin", ByteRange::from_offset(0))
            .await
            .is_err());

        let mut stream = client
            .open_range_stream("b", "k.bin", ByteRange::from_offset(0))
            .await
            .unwrap();
        client.zero_next_reads(1);
        assert_eq!(stream.read_chunk(4).await.unwrap().map(|b| b.len()), Some(0));
        client.fail_next_reads(1);
        let err = stream.read_chunk(4).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stream.read_chunk(4).await.unwrap().map(|b| b.len()), Some(4));

        client.fail_next_heads(1);
        assert!(client.head_object("b", "k.bin").await.is_err());
        assert!(client.head_object("b", "k.bin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stall_and_release() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "k.bin", sample(10));
        let mut stream = client
            .open_range_stream("b", "k.bin", ByteRange::from_offset(0))
            .await
            .unwrap();

        client.set_stalled(true);
        let stalled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            stream.read_chunk(4),
        )
        .await;
        assert!(stalled.is_err());

        let releaser = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            releaser.set_stalled(false);
        });
        let chunk = stream.read_chunk(4).await.unwrap().unwrap();
        assert_eq!(chunk.len(), 4);
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "photos/", Vec::new());
        client.put_object("b", "photos/a.jpg", sample(3));
        client.put_object("b", "photos/b.jpg", sample(5));
        client.put_object("b", "photos/2020/c.jpg", sample(7));
        client.put_object("b", "photos/2021/d.jpg", sample(7));
        client.put_object("b", "photosx.txt", sample(1));

        let listing = client
            .list_objects("b", "photos/", Some("/"))
            .await
            .unwrap();
        assert_eq!(
            listing.common_prefixes,
            vec!["photos/2020/".to_string(), "photos/2021/".to_string()]
        );
        let keys: Vec<&str> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["photos/", "photos/a.jpg", "photos/b.jpg"]);

        let root = client.list_objects("b", "", Some("/")).await.unwrap();
        assert_eq!(root.common_prefixes, vec!["photos/".to_string()]);
        assert_eq!(root.objects.len(), 1);
        assert_eq!(client.list_requests(), 2);
    }

    #[tokio::test]
    async fn test_list_without_delimiter_is_flat() {
        let client = MemoryStorageClient::new();
        client.put_object("b", "a/b/c.txt", sample(1));
        client.put_object("b", "a/d.txt", sample(1));

        let listing = client.list_objects("b", "a/", None).await.unwrap();
        assert!(listing.common_prefixes.is_empty());
        assert_eq!(listing.objects.len(), 2);
    }
}
