//! Remote random-access reads over S3 and a read-only FUSE filesystem.
//!
//! Objects in one bucket appear as files; content is fetched lazily through
//! long-lived ranged GET streams that are shared between callers reading
//! nearby offsets.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: FUSE Interface (fuser::Filesystem impl, `fuse` feature)
//! Layer 2: ReadEngine (stat, read, list_dir)
//! Layer 1: Primitives (StreamPool, StreamReader, RangeCache, FileMetadataCache)
//! Layer 0: BufferBlock, AccessStamp, Reaper, Backend
//! ```
//!
//! Engine calls are blocking. They must come from threads outside the tokio
//! runtime that drives the storage client (FUSE session threads, plain
//! `std::thread`s).

pub mod backend;
pub mod buffer_block;
pub mod engine;
pub mod error;
pub mod fuse;
pub mod inode;
pub mod metadata;
pub mod options;
pub mod range_cache;
pub mod reaper;
pub mod stamp;
pub mod stream_pool;
pub mod stream_reader;

pub use backend::Backend;
pub use buffer_block::BufferBlock;
pub use engine::{DirEntry, ReadEngine, ReadStats};
pub use error::VfsError;
pub use inode::{InodeTable, ROOT_INODE};
pub use metadata::{FileMetadataCache, FileStat};
pub use options::{KernelCacheOptions, PoolOptions, RangeCacheOptions, StreamOptions, VfsOptions};
pub use range_cache::{CacheHit, InsertOutcome, RangeCache, RangeCacheStats};
pub use reaper::{IdleSweep, Reaper};
pub use stream_pool::{PoolStats, StreamPool};
pub use stream_reader::{ReaderStats, StreamReader};

#[cfg(feature = "fuse")]
pub use fuse::{mount, spawn_mount, MountSettings, S3Vfs};
