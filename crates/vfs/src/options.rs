//! Configuration options for the VFS.
//!
//! This module provides configuration for the read path: stream buffering,
//! reader pooling, the range cache, and kernel caching. Durations are stored
//! as integer milliseconds or seconds so options round-trip through JSON.

use std::time::Duration;

use rusty_s3fs_common::{
    BUFFER_TIMEOUT, FILL_POLL_INTERVAL, IO_BUFFER_SIZE, MAX_FETCH_FAILURES, MAX_STALLED_WAITS,
    RANGE_CACHE_IDLE_TIMEOUT, RANGE_CACHE_MAX_BYTES, READ_AHEAD_SIZE, READ_WAIT_TIMEOUT,
    REAP_INTERVAL, STREAM_BUFFER_BLOCK_SIZE, STREAM_IDLE_TIMEOUT, ZERO_READ_PAUSE,
};
use serde::{Deserialize, Serialize};

use crate::error::VfsError;

/// Configuration options for the VFS.
///
/// # Example
///
/// ```ignore
/// let options = VfsOptions::default()
///     .with_stream(StreamOptions::default().with_block_size(128 * 1024))
///     .with_range_cache(RangeCacheOptions::disabled());
///
/// let engine = ReadEngine::new(client, handle, "my-bucket", options)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsOptions {
    /// Stream reader buffering.
    pub stream: StreamOptions,
    /// Reader pool behavior.
    pub pool: PoolOptions,
    /// Range cache settings.
    pub range_cache: RangeCacheOptions,
    /// Kernel cache settings.
    pub kernel_cache: KernelCacheOptions,
}

impl VfsOptions {
    /// Set stream options.
    ///
    /// # Arguments
    /// * `stream` - Stream buffering configuration
    pub fn with_stream(mut self, stream: StreamOptions) -> Self {
        self.stream = stream;
        self
    }

    /// Set pool options.
    ///
    /// # Arguments
    /// * `pool` - Reader pool configuration
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Set range cache options.
    ///
    /// # Arguments
    /// * `range_cache` - Range cache configuration
    pub fn with_range_cache(mut self, range_cache: RangeCacheOptions) -> Self {
        self.range_cache = range_cache;
        self
    }

    /// Set kernel cache options.
    ///
    /// # Arguments
    /// * `kernel_cache` - Kernel cache configuration
    pub fn with_kernel_cache(mut self, kernel_cache: KernelCacheOptions) -> Self {
        self.kernel_cache = kernel_cache;
        self
    }

    /// Skip-ahead distance under which a reader is reused rather than replaced.
    ///
    /// # Returns
    /// The configured threshold, or one block when unset.
    pub fn reuse_threshold(&self) -> u64 {
        self.pool
            .reuse_threshold
            .unwrap_or(self.stream.block_size as u64)
    }

    /// Check that the values can work together.
    pub fn validate(&self) -> Result<(), VfsError> {
        let s: &StreamOptions = &self.stream;
        if s.io_buffer_size == 0 {
            return Err(VfsError::InvalidOptions("io_buffer_size must be positive".into()));
        }
        if s.block_size < s.io_buffer_size {
            return Err(VfsError::InvalidOptions(format!(
                "block_size ({}) must be at least io_buffer_size ({})",
                s.block_size, s.io_buffer_size
            )));
        }
        if s.read_ahead_size < s.block_size as u64 {
            return Err(VfsError::InvalidOptions(format!(
                "read_ahead_size ({}) must be at least block_size ({})",
                s.read_ahead_size, s.block_size
            )));
        }
        if s.read_wait_timeout_ms == 0 {
            return Err(VfsError::InvalidOptions("read_wait_timeout_ms must be positive".into()));
        }
        if s.max_fetch_failures == 0 {
            return Err(VfsError::InvalidOptions("max_fetch_failures must be positive".into()));
        }
        if s.max_stalled_waits == 0 {
            return Err(VfsError::InvalidOptions("max_stalled_waits must be positive".into()));
        }
        if self.pool.reap_interval_ms == 0 {
            return Err(VfsError::InvalidOptions("reap_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Stream Options
// ============================================================================

/// Buffering behavior of a single stream reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Bytes requested per backend read.
    pub io_buffer_size: usize,

    /// Bytes per buffer block. The unit of fetch and of eviction.
    pub block_size: usize,

    /// How far past the furthest requested byte the reader keeps fetching.
    pub read_ahead_size: u64,

    /// Blocks untouched for this long, and already read past, are evicted.
    pub buffer_timeout_ms: u64,

    /// Longest a read waits for its bytes before timing out.
    pub read_wait_timeout_ms: u64,

    /// Fill thread wakes at least this often to check for eviction and close.
    pub fill_poll_interval_ms: u64,

    /// Pause after a zero-byte backend read.
    pub zero_read_pause_ms: u64,

    /// Consecutive failed fetches that close the reader.
    pub max_fetch_failures: u32,

    /// Consecutive read timeouts without fetch progress that retire the reader.
    pub max_stalled_waits: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            io_buffer_size: IO_BUFFER_SIZE,
            block_size: STREAM_BUFFER_BLOCK_SIZE,
            read_ahead_size: READ_AHEAD_SIZE,
            buffer_timeout_ms: BUFFER_TIMEOUT.as_millis() as u64,
            read_wait_timeout_ms: READ_WAIT_TIMEOUT.as_millis() as u64,
            fill_poll_interval_ms: FILL_POLL_INTERVAL.as_millis() as u64,
            zero_read_pause_ms: ZERO_READ_PAUSE.as_millis() as u64,
            max_fetch_failures: MAX_FETCH_FAILURES,
            max_stalled_waits: MAX_STALLED_WAITS,
        }
    }
}

impl StreamOptions {
    /// Set the buffer block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the backend read size.
    pub fn with_io_buffer_size(mut self, io_buffer_size: usize) -> Self {
        self.io_buffer_size = io_buffer_size;
        self
    }

    /// Set the read-ahead window.
    pub fn with_read_ahead_size(mut self, read_ahead_size: u64) -> Self {
        self.read_ahead_size = read_ahead_size;
        self
    }

    /// Set the block idle eviction timeout.
    pub fn with_buffer_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the read deadline.
    pub fn with_read_wait_timeout(mut self, timeout: Duration) -> Self {
        self.read_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the fill thread poll interval.
    pub fn with_fill_poll_interval(mut self, interval: Duration) -> Self {
        self.fill_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the failure limit.
    pub fn with_max_fetch_failures(mut self, max_fetch_failures: u32) -> Self {
        self.max_fetch_failures = max_fetch_failures;
        self
    }

    /// Set how many unproductive read timeouts retire a reader.
    pub fn with_max_stalled_waits(mut self, max_stalled_waits: u32) -> Self {
        self.max_stalled_waits = max_stalled_waits;
        self
    }

    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    pub fn read_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.read_wait_timeout_ms)
    }

    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms.max(1))
    }

    pub fn zero_read_pause(&self) -> Duration {
        Duration::from_millis(self.zero_read_pause_ms)
    }
}

// ============================================================================
// Pool Options
// ============================================================================

/// Reader pool and reaper behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Readers with no reads for this long are closed.
    pub idle_timeout_ms: u64,

    /// Interval between reaper sweeps.
    pub reap_interval_ms: u64,

    /// Largest forward skip served by an existing reader. None means one block.
    pub reuse_threshold: Option<u64>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout_ms: STREAM_IDLE_TIMEOUT.as_millis() as u64,
            reap_interval_ms: REAP_INTERVAL.as_millis() as u64,
            reuse_threshold: None,
        }
    }
}

impl PoolOptions {
    /// Set the reader idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the reaper interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the reuse threshold explicitly.
    pub fn with_reuse_threshold(mut self, threshold: u64) -> Self {
        self.reuse_threshold = Some(threshold);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

// ============================================================================
// Range Cache Options
// ============================================================================

/// Second-level cache of fetched ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeCacheOptions {
    /// Keep fetched ranges after they leave a reader's window.
    pub enabled: bool,

    /// Total byte budget across all paths. Least recently used paths go first.
    pub max_bytes: u64,

    /// Paths with no activity for this long are dropped.
    pub idle_timeout_ms: u64,
}

impl Default for RangeCacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: RANGE_CACHE_MAX_BYTES,
            idle_timeout_ms: RANGE_CACHE_IDLE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl RangeCacheOptions {
    /// Create options with the range cache turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the byte budget.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

// ============================================================================
// Kernel Cache Options
// ============================================================================

/// Options for kernel-level caching (FUSE).
///
/// Controls how the kernel caches file data and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelCacheOptions {
    /// Let the kernel keep file pages between opens.
    pub enable_page_cache: bool,

    /// Attribute cache timeout in seconds.
    pub attr_timeout_secs: u64,

    /// Entry cache timeout in seconds.
    pub entry_timeout_secs: u64,
}

impl Default for KernelCacheOptions {
    fn default() -> Self {
        Self {
            enable_page_cache: true,
            attr_timeout_secs: 60,
            entry_timeout_secs: 60,
        }
    }
}

impl KernelCacheOptions {
    /// Create options with no kernel caching.
    pub fn no_cache() -> Self {
        Self {
            enable_page_cache: false,
            attr_timeout_secs: 0,
            entry_timeout_secs: 0,
        }
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_timeout_secs)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
