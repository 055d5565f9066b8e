//! AWS SDK S3 client implementation.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use rusty_s3fs_storage::{
    ByteRange, ListResult, ObjectInfo, ObjectMetadata, RangeStream, StorageClient, StorageError,
    StorageSettings,
};

use crate::error::CrtError;

/// StorageClient implementation using AWS SDK for Rust.
///
/// Concurrent backend requests are bounded by `max_connections`. A HEAD or
/// list page holds a permit for the duration of the call; an open range
/// stream holds one until it is dropped.
pub struct CrtStorageClient {
    /// The underlying S3 client.
    s3_client: S3Client,
    /// Expected bucket owner for security validation.
    expected_bucket_owner: Option<String>,
    /// Connection budget.
    permits: Arc<Semaphore>,
}

impl CrtStorageClient {
    /// Create a new storage client with the default credential chain, or the
    /// static credentials in `settings` when present.
    ///
    /// # Arguments
    /// * `settings` - Region, endpoint, credentials and connection limit
    ///
    /// # Returns
    /// A new client, or `InvalidConfig` if the settings cannot work.
    pub async fn new(settings: StorageSettings) -> Result<Self, StorageError> {
        if settings.max_connections == 0 {
            return Err(CrtError::ConfigError("max_connections must be at least 1".into()).into());
        }

        let config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()));

        let config_loader = if let Some(ref creds) = settings.credentials {
            let credentials = Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                creds.session_token.clone(),
                None,
                "rusty-s3fs",
            );
            config_loader.credentials_provider(credentials)
        } else {
            config_loader
        };

        let sdk_config = config_loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(ref endpoint) = settings.endpoint {
            // S3-compatible stores rarely support virtual-hosted buckets.
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let s3_client = S3Client::from_conf(s3_config.build());

        debug!(
            region = %settings.region,
            endpoint = ?settings.endpoint,
            max_connections = settings.max_connections,
            "Created S3 client"
        );

        Ok(Self::from_client(
            s3_client,
            settings.expected_bucket_owner,
            settings.max_connections,
        ))
    }

    /// Create a client from an existing S3Client (for testing).
    ///
    /// # Arguments
    /// * `s3_client` - Pre-configured S3 client
    /// * `expected_bucket_owner` - Optional expected bucket owner
    /// * `max_connections` - Concurrent request limit
    pub fn from_client(
        s3_client: S3Client,
        expected_bucket_owner: Option<String>,
        max_connections: usize,
    ) -> Self {
        Self {
            s3_client,
            expected_bucket_owner,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    /// Permits not currently held by a request or stream.
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, StorageError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Cancelled)
    }
}

/// Map an SDK failure onto the storage taxonomy.
fn map_sdk_error<E, R>(err: SdkError<E, R>, bucket: &str, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let transport: bool = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
    );
    let code: Option<String> = err.code().map(|c| c.to_string());
    let message: String = DisplayErrorContext(&err).to_string();

    match code.as_deref() {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        Some("AccessDenied") | Some("Forbidden") => StorageError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        },
        Some("SlowDown") | Some("InternalError") | Some("ServiceUnavailable")
        | Some("RequestTimeout") => CrtError::SdkError {
            message,
            retryable: true,
        }
        .into(),
        _ => CrtError::SdkError {
            message,
            retryable: transport,
        }
        .into(),
    }
}

#[async_trait]
impl StorageClient for CrtStorageClient {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        let _permit: OwnedSemaphorePermit = self.acquire().await?;
        let mut request = self.s3_client.head_object().bucket(bucket).key(key);

        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        match request.send().await {
            Ok(output) => {
                let last_modified: Option<i64> = output
                    .last_modified()
                    .and_then(|dt| dt.to_millis().ok())
                    .map(|ms| ms / 1000);

                Ok(Some(ObjectMetadata {
                    size: output.content_length().map(|l| l.max(0) as u64).unwrap_or(0),
                    last_modified,
                    etag: output.e_tag().map(|s| s.to_string()),
                }))
            }
            Err(err) => {
                if let SdkError::ServiceError(ref service) = err {
                    if service.err().is_not_found() {
                        return Ok(None);
                    }
                }
                Err(map_sdk_error(err, bucket, key))
            }
        }
    }

    async fn open_range_stream(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> Result<Box<dyn RangeStream>, StorageError> {
        let permit: OwnedSemaphorePermit = self.acquire().await?;
        let mut request = self
            .s3_client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(range.to_header());

        if let Some(ref owner) = self.expected_bucket_owner {
            request = request.expected_bucket_owner(owner);
        }

        let response = request
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, key))?;

        debug!(bucket, key, range = %range.to_header(), "Opened range stream");

        Ok(Box::new(S3RangeStream {
            body: response.body,
            pending: Bytes::new(),
            _permit: permit,
        }))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<ListResult, StorageError> {
        let mut result = ListResult::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let _permit: OwnedSemaphorePermit = self.acquire().await?;
            let mut request = self
                .s3_client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);

            if let Some(delimiter) = delimiter {
                request = request.delimiter(delimiter);
            }

            if let Some(ref owner) = self.expected_bucket_owner {
                request = request.expected_bucket_owner(owner);
            }

            if let Some(ref token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|err| map_sdk_error(err, bucket, prefix))?;

            for common in response.common_prefixes() {
                if let Some(p) = common.prefix() {
                    result.common_prefixes.push(p.to_string());
                }
            }

            for obj in response.contents() {
                let last_modified: Option<i64> = obj
                    .last_modified()
                    .and_then(|dt| dt.to_millis().ok())
                    .map(|ms| ms / 1000);

                result.objects.push(ObjectInfo {
                    key: obj.key().unwrap_or_default().to_string(),
                    size: obj.size().map(|s| s.max(0) as u64).unwrap_or(0),
                    last_modified,
                });
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token.clone();
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(result)
    }
}

/// Body of a ranged GET, re-chunked to the caller's read size.
struct S3RangeStream {
    body: ByteStream,
    /// Bytes received from the body but not yet handed out.
    pending: Bytes,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl RangeStream for S3RangeStream {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, StorageError> {
        if self.pending.is_empty() {
            match self.body.try_next().await {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => return Ok(None),
                Err(e) => {
                    return Err(CrtError::SdkError {
                        message: e.to_string(),
                        retryable: true,
                    }
                    .into())
                }
            }
        }
        let n: usize = max_len.max(1).min(self.pending.len());
        Ok(Some(self.pending.split_to(n)))
    }
}
