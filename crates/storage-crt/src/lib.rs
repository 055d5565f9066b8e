//! AWS SDK S3 backend for rusty-s3fs storage.
//!
//! This crate provides a `StorageClient` implementation using the AWS SDK for Rust.
//! It supports the three operations the read engine needs: HEAD requests,
//! ranged GET streams, and delimited listings.
//!
//! # Example
//!
//! ```ignore
//! use rusty_s3fs_storage_crt::CrtStorageClient;
//! use rusty_s3fs_storage::{ByteRange, StorageClient, StorageSettings};
//!
//! let settings = StorageSettings::default().with_region("eu-west-1");
//! let client = CrtStorageClient::new(settings).await?;
//! let mut stream = client
//!     .open_range_stream("my-bucket", "videos/a.mp4", ByteRange::from_offset(0))
//!     .await?;
//! ```

mod client;
mod error;

pub use client::CrtStorageClient;
pub use error::CrtError;
