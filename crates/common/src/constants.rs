//! Shared constants used across rusty-s3fs crates.
//!
//! These are the process-wide defaults for the read path. Every value here can
//! be overridden through the VFS options at mount time.

use std::time::Duration;

/// Size of a single read issued against an open backend stream (32KB).
pub const IO_BUFFER_SIZE: usize = 32 * 1024;

/// Unit of backend fetch: one buffer block (256KB).
pub const STREAM_BUFFER_BLOCK_SIZE: usize = 256 * 1024;

/// How far past the high-water mark a stream keeps buffering (1MB).
pub const READ_AHEAD_SIZE: u64 = 1024 * 1024;

/// Buffer blocks not touched for this long are evicted.
pub const BUFFER_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound a read waits for its bytes to be buffered.
pub const READ_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fill loop wakes at least this often, even without a fill request.
pub const FILL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a zero-byte read from the backend before retrying.
pub const ZERO_READ_PAUSE: Duration = Duration::from_millis(10);

/// Consecutive failed fetches after which a stream is closed for good.
pub const MAX_FETCH_FAILURES: u32 = 3;

/// Consecutive read timeouts with no fetch progress after which a stream is retired.
pub const MAX_STALLED_WAITS: u32 = 2;

/// Streams with no reads for this long are closed by the reaper.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between reaper sweeps.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Default byte budget of the range cache (256MB).
pub const RANGE_CACHE_MAX_BYTES: u64 = 256 * 1024 * 1024;

/// Paths in the range cache with no activity for this long are dropped.
pub const RANGE_CACHE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of concurrent backend connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default backend region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Key delimiter used to emulate directories.
pub const KEY_DELIMITER: char = '/';

// Block and IO sizes must be positive, and a block must hold at least one IO read.
const _: () = assert!(IO_BUFFER_SIZE > 0);
const _: () = assert!(STREAM_BUFFER_BLOCK_SIZE >= IO_BUFFER_SIZE);
const _: () = assert!(READ_AHEAD_SIZE >= STREAM_BUFFER_BLOCK_SIZE as u64);

// Timeouts: a read must be able to outwait a buffer eviction cycle.
const _: () = assert!(BUFFER_TIMEOUT.as_millis() < READ_WAIT_TIMEOUT.as_millis());
const _: () = assert!(REAP_INTERVAL.as_millis() < STREAM_IDLE_TIMEOUT.as_millis());
const _: () = assert!(MAX_FETCH_FAILURES > 0);
const _: () = assert!(MAX_STALLED_WAITS > 0);
