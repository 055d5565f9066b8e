//! Storage abstraction for rusty-s3fs object reads.
//!
//! This crate provides the platform-agnostic contract the read engine uses to
//! talk to an object store. It supports multiple backends:
//!
//! - **SDK Backend** - `rusty-s3fs-storage-crt`, native Rust over the AWS SDK
//! - **Memory Backend** - [`MemoryStorageClient`], an in-process store with
//!   fault injection for tests
//!
//! # Contract
//!
//! A backend answers three questions: how big is an object ([`StorageClient::head_object`]),
//! what are its bytes from some offset on ([`StorageClient::open_range_stream`]),
//! and what lives under a prefix ([`StorageClient::list_objects`]).

mod error;
mod memory;
mod traits;
mod types;

pub use error::StorageError;
pub use memory::MemoryStorageClient;
pub use traits::{RangeStream, StorageClient};
pub use types::{
    AwsCredentials, ByteRange, ListResult, ObjectInfo, ObjectMetadata, StorageSettings,
};
