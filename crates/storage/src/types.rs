//! Shared data structures for storage operations.

use rusty_s3fs_common::{DEFAULT_MAX_CONNECTIONS, DEFAULT_REGION};
use serde::{Deserialize, Serialize};

/// Configuration settings for storage operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageSettings {
    /// AWS region.
    pub region: String,
    /// Custom endpoint URL (S3-compatible stores). Enables path-style addressing.
    pub endpoint: Option<String>,
    /// AWS credentials (access key, secret key, session token).
    /// None uses the default provider chain.
    pub credentials: Option<AwsCredentials>,
    /// Expected bucket owner account ID, sent with every request when set.
    pub expected_bucket_owner: Option<String>,
    /// Maximum concurrent backend requests, including open range streams.
    pub max_connections: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.into(),
            endpoint: None,
            credentials: None,
            expected_bucket_owner: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StorageSettings {
    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set static credentials.
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the connection limit.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// AWS credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Half-open byte range `[start, end)` of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Exclusive end offset. None reads to the end of the object.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range from `start` to the end of the object.
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Range `[start, end)`.
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// HTTP `Range` header value for this range.
    ///
    /// # Returns
    /// `bytes=start-` when open-ended, `bytes=start-(end-1)` otherwise.
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) if end > self.start => format!("bytes={}-{}", self.start, end - 1),
            // Degenerate bounded range; ask for one byte and let the caller clip.
            Some(_) => format!("bytes={}-{}", self.start, self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Result of a HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object size in bytes.
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub last_modified: Option<i64>,
    /// ETag (usually MD5 hash for non-multipart uploads).
    pub etag: Option<String>,
}

impl ObjectMetadata {
    /// Metadata with only a size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            last_modified: None,
            etag: None,
        }
    }
}

/// Information about an S3 object from list operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// S3 object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub last_modified: Option<i64>,
}

/// Result of a delimited listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    /// Prefixes that group keys past the delimiter, each ending in the delimiter.
    pub common_prefixes: Vec<String>,
    /// Objects directly under the listed prefix.
    pub objects: Vec<ObjectInfo>,
}
