//! Storage traits/interfaces for S3 operations.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::types::{ByteRange, ListResult, ObjectMetadata};

/// Low-level S3 operations - implemented by each backend.
///
/// The read path only needs three things from the object store: a metadata
/// request, a forward-only ranged stream, and a delimited listing.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Fetch an object's metadata.
    /// Returns None if object doesn't exist.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError>;

    /// Open a forward-only byte stream over `range` of an object.
    ///
    /// The stream holds one backend connection until it is dropped.
    async fn open_range_stream(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> Result<Box<dyn RangeStream>, StorageError>;

    /// List objects and common prefixes under `prefix`, grouped by `delimiter`.
    /// Follows pagination to completion.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<ListResult, StorageError>;
}

/// An open ranged read against one object.
#[async_trait]
pub trait RangeStream: Send {
    /// Read the next chunk of at most `max_len` bytes.
    ///
    /// # Returns
    /// * `Ok(Some(bytes))` - Next chunk; may be empty on a zero-byte read
    /// * `Ok(None)` - The range is exhausted
    /// * `Err(_)` - The read failed; the stream should not be used again
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, StorageError>;
}
