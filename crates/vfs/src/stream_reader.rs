//! A read-ahead cursor into one remote object.
//!
//! # Design
//!
//! Each `StreamReader` owns a background fill thread that keeps a forward-only
//! backend stream open and appends fixed-size [`BufferBlock`]s until the write
//! cursor is one read-ahead window past the furthest byte any caller has
//! asked for (the high-water mark). Callers never touch the backend: they
//! raise the high-water mark, wake the fill thread, and wait on a condition
//! variable until their bytes are buffered or the deadline passes.
//!
//! The fill thread is the only mutator of the block list. Callers snapshot
//! `Arc<BufferBlock>` handles under the lock and copy after releasing it, so
//! eviction can never free a block mid-copy.
//!
//! Blocks are contiguous. Eviction pops from the front only, and only blocks
//! that are idle and lie entirely below the high-water mark.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use rusty_s3fs_storage::{ByteRange, RangeStream, StorageError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::buffer_block::BufferBlock;
use crate::error::VfsError;
use crate::options::StreamOptions;
use crate::stamp::AccessStamp;

/// Handle to a stream reader. Dropping the last handle closes it.
#[derive(Debug)]
pub struct StreamReader {
    shared: Arc<ReaderShared>,
}

/// Point-in-time view of a reader, for routing diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderStats {
    /// Offset the reader was opened at.
    pub start_offset: u64,
    /// Offset of the earliest retained byte.
    pub buffered_start: u64,
    /// Next offset the fill thread will fetch.
    pub write_offset: u64,
    /// Furthest byte (exclusive) requested through this reader.
    pub high_water_mark: u64,
    /// Bytes currently held in blocks.
    pub buffered_bytes: u64,
    /// Blocks currently held.
    pub blocks: usize,
    /// Bytes fetched over the reader's lifetime.
    pub bytes_fetched: u64,
    /// No more blocks will be appended.
    pub finished: bool,
    /// The backend reported end of object.
    pub eof: bool,
    /// Why the reader gave up, if it did.
    pub failure: Option<String>,
}

#[derive(Debug)]
struct ReaderShared {
    id: u64,
    bucket: String,
    key: String,
    start_offset: u64,
    options: StreamOptions,
    backend: Backend,
    state: Mutex<ReaderState>,
    /// Signalled by the fill thread after each block and on finish.
    data_ready: Condvar,
    /// Signalled by callers that need more data, and on close.
    fill_wanted: Condvar,
    high_water_mark: AtomicU64,
    last_read: AccessStamp,
    closed: AtomicBool,
    /// Consecutive read timeouts during which no bytes arrived.
    stalled_waits: AtomicU32,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ReaderState {
    blocks: VecDeque<Arc<BufferBlock>>,
    write_offset: u64,
    finished: bool,
    eof: bool,
    failure: Option<String>,
    bytes_fetched: u64,
}

/// How one block fetch ended.
enum FetchEnd {
    /// Block filled to size.
    Full,
    /// Backend reached end of object.
    Eof,
    /// Backend read failed; partial bytes are kept.
    Failed(StorageError),
    /// Reader was closed during the fetch.
    Cancelled,
}

impl StreamReader {
    /// Open a reader at `start_offset` and start its fill thread.
    ///
    /// Returns immediately; the backend stream is opened on the fill thread.
    ///
    /// # Arguments
    /// * `id` - Identifier used in log output
    /// * `backend` - Storage client and runtime
    /// * `bucket` - Bucket holding the object
    /// * `key` - Object key
    /// * `start_offset` - First byte this reader will fetch
    /// * `options` - Buffering configuration
    pub fn open(
        id: u64,
        backend: Backend,
        bucket: &str,
        key: &str,
        start_offset: u64,
        options: StreamOptions,
    ) -> Result<Self, VfsError> {
        let shared = Arc::new(ReaderShared {
            id,
            bucket: bucket.to_string(),
            key: key.to_string(),
            start_offset,
            options,
            backend,
            state: Mutex::new(ReaderState {
                blocks: VecDeque::new(),
                write_offset: start_offset,
                finished: false,
                eof: false,
                failure: None,
                bytes_fetched: 0,
            }),
            data_ready: Condvar::new(),
            fill_wanted: Condvar::new(),
            high_water_mark: AtomicU64::new(start_offset),
            last_read: AccessStamp::new(),
            closed: AtomicBool::new(false),
            stalled_waits: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        });

        let worker: Arc<ReaderShared> = shared.clone();
        std::thread::Builder::new()
            .name(format!("s3fs-fill-{}", id))
            .spawn(move || worker.fill_loop())
            .map_err(VfsError::ThreadSpawn)?;

        info!(reader = id, bucket, key, offset = start_offset, "Opened stream reader");
        Ok(Self { shared })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn start_offset(&self) -> u64 {
        self.shared.start_offset
    }

    /// Read the byte at `location`, waiting for it to be buffered.
    ///
    /// # Returns
    /// * `Ok(Some(b))` - The byte
    /// * `Ok(None)` - The reader finished before reaching `location`
    /// * `Err(Timeout)` - Not buffered before the read deadline
    pub fn read_byte(&self, location: u64) -> Result<Option<u8>, VfsError> {
        let bytes: Bytes = self.read_range(location, 1)?;
        Ok(bytes.first().copied())
    }

    /// Read `[offset, offset + length)`, waiting for the bytes to be buffered.
    ///
    /// # Returns
    /// * `Ok(bytes)` - All requested bytes, or a shorter prefix if the reader
    ///   finished (end of object, fatal failure or close) before the end
    /// * `Err(Timeout)` - The bytes were not buffered before the read deadline.
    ///   After `max_stalled_waits` consecutive timeouts with no bytes fetched
    ///   the reader closes itself, so the pool stops routing to it
    /// * `Err(Evicted)` - `offset` has already been dropped from the buffer
    pub fn read_range(&self, offset: u64, length: usize) -> Result<Bytes, VfsError> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let shared: &ReaderShared = &self.shared;
        let end: u64 = offset.saturating_add(length as u64);
        let started: Instant = Instant::now();
        let deadline: Instant = started + shared.options.read_wait_timeout();

        shared.last_read.touch();
        shared.high_water_mark.fetch_max(end, Ordering::SeqCst);

        let mut state = shared.state.lock();
        let fetched_at_start: u64 = state.bytes_fetched;
        loop {
            let lower: u64 = state
                .blocks
                .front()
                .map(|b| b.offset())
                .unwrap_or(state.write_offset);
            if offset < lower {
                debug!(reader = shared.id, offset, lower, "Requested offset already evicted");
                return Err(VfsError::Evicted { offset });
            }

            if state.write_offset >= end || state.finished {
                let span: Vec<Arc<BufferBlock>> = state
                    .blocks
                    .iter()
                    .filter(|b| b.max_offset() > offset && b.offset() < end)
                    .cloned()
                    .collect();
                drop(state);
                shared.stalled_waits.store(0, Ordering::SeqCst);
                return Ok(assemble(&span, offset, length));
            }

            let now: Instant = Instant::now();
            if now >= deadline {
                let waited: Duration = now - started;
                let progressed: bool = state.bytes_fetched > fetched_at_start;
                let write_offset: u64 = state.write_offset;
                drop(state);
                error!(
                    reader = shared.id,
                    key = %shared.key,
                    offset,
                    length,
                    write_offset,
                    ?waited,
                    "Timed out waiting for stream data"
                );
                shared.note_timeout(progressed);
                return Err(VfsError::Timeout {
                    path: shared.key.clone(),
                    offset,
                    waited,
                });
            }

            // Held lock makes the wakeup race-free against the fill thread's check.
            shared.fill_wanted.notify_one();
            shared.data_ready.wait_until(&mut state, deadline);
        }
    }

    /// Whether `offset` falls in the buffered span extended by one read-ahead
    /// window. Used by the pool to route reads.
    pub fn within(&self, offset: u64) -> bool {
        let state = self.shared.state.lock();
        let lower: u64 = state
            .blocks
            .front()
            .map(|b| b.offset())
            .unwrap_or(state.write_offset);
        let upper: u64 = if state.finished {
            state.write_offset
        } else {
            let hwm: u64 = self.shared.high_water_mark.load(Ordering::SeqCst);
            hwm.max(state.write_offset)
                .saturating_add(self.shared.options.read_ahead_size)
        };
        lower <= offset && offset < upper
    }

    /// Distance `offset` lies ahead of the write cursor, if this reader is
    /// still fetching and trails `offset` by less than `threshold`.
    pub fn trails(&self, offset: u64, threshold: u64) -> Option<u64> {
        if self.is_closed() {
            return None;
        }
        let state = self.shared.state.lock();
        if state.finished || offset < state.write_offset {
            return None;
        }
        let gap: u64 = offset - state.write_offset;
        (gap < threshold).then_some(gap)
    }

    /// Record a read selection at the current time.
    pub fn touch(&self) {
        self.shared.last_read.touch();
    }

    /// Time of the most recent read or selection.
    pub fn last_read(&self) -> Instant {
        self.shared.last_read.last_access()
    }

    /// How long the reader has gone unread as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.shared.last_read.idle_for(now)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Whether the reader is finished with no bytes left to serve.
    pub fn is_spent(&self) -> bool {
        if self.is_closed() {
            return true;
        }
        let state = self.shared.state.lock();
        state.finished && state.blocks.is_empty()
    }

    /// Why the reader stopped fetching after repeated backend failures.
    pub fn failure(&self) -> Option<String> {
        self.shared.state.lock().failure.clone()
    }

    /// Whether the backend reported end of object.
    pub fn reached_eof(&self) -> bool {
        self.shared.state.lock().eof
    }

    pub fn stats(&self) -> ReaderStats {
        let state = self.shared.state.lock();
        ReaderStats {
            start_offset: self.shared.start_offset,
            buffered_start: state
                .blocks
                .front()
                .map(|b| b.offset())
                .unwrap_or(state.write_offset),
            write_offset: state.write_offset,
            high_water_mark: self.shared.high_water_mark.load(Ordering::SeqCst),
            buffered_bytes: state.blocks.iter().map(|b| b.len() as u64).sum(),
            blocks: state.blocks.len(),
            bytes_fetched: state.bytes_fetched,
            finished: state.finished,
            eof: state.eof,
            failure: state.failure.clone(),
        }
    }

    /// Stop the fill thread, release the backend stream and drop buffered
    /// blocks. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Concatenate the blocks covering `[offset, offset + length)`.
///
/// Stops at the first gap, so a short span yields a prefix.
fn assemble(span: &[Arc<BufferBlock>], offset: u64, length: usize) -> Bytes {
    if let [only] = span {
        return only.slice_from(offset, length);
    }
    let end: u64 = offset + length as u64;
    let mut out = BytesMut::with_capacity(length);
    let mut cursor: u64 = offset;
    for block in span {
        if cursor >= end || !block.within(cursor) {
            break;
        }
        let piece: Bytes = block.slice_from(cursor, (end - cursor) as usize);
        cursor += piece.len() as u64;
        out.extend_from_slice(&piece);
    }
    out.freeze()
}

impl ReaderShared {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        {
            let mut state = self.state.lock();
            state.finished = true;
            state.blocks.clear();
        }
        self.fill_wanted.notify_all();
        self.data_ready.notify_all();
        info!(reader = self.id, key = %self.key, "Closed stream reader");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Count a read timeout. A reader that keeps timing out without fetching
    /// anything is closed.
    fn note_timeout(&self, progressed: bool) {
        if progressed {
            self.stalled_waits.store(0, Ordering::SeqCst);
            return;
        }
        let stalled: u32 = self.stalled_waits.fetch_add(1, Ordering::SeqCst) + 1;
        if stalled >= self.options.max_stalled_waits {
            warn!(
                reader = self.id,
                key = %self.key,
                stalled,
                "Retiring stream reader that made no progress"
            );
            self.close();
        }
    }

    fn wants_fill(&self, state: &ReaderState) -> bool {
        let hwm: u64 = self.high_water_mark.load(Ordering::SeqCst);
        !state.finished && state.write_offset < hwm.saturating_add(self.options.read_ahead_size)
    }

    /// Pop idle blocks from the front that lie entirely below the high-water mark.
    fn evict_idle(&self, state: &mut ReaderState, now: Instant) {
        let hwm: u64 = self.high_water_mark.load(Ordering::SeqCst);
        let timeout: Duration = self.options.buffer_timeout();
        let mut evicted: usize = 0;
        while let Some(front) = state.blocks.front() {
            if front.max_offset() > hwm || front.idle_for(now) < timeout {
                break;
            }
            state.blocks.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(reader = self.id, evicted, "Evicted idle buffer blocks");
        }
    }

    /// Body of the fill thread.
    fn fill_loop(self: Arc<Self>) {
        let mut stream: Option<Box<dyn RangeStream>> = None;
        let mut failures: u32 = 0;

        loop {
            let write_offset: u64 = {
                let mut state = self.state.lock();
                loop {
                    if self.is_closed() || state.finished {
                        break;
                    }
                    self.evict_idle(&mut state, Instant::now());
                    if self.wants_fill(&state) {
                        break;
                    }
                    self.fill_wanted
                        .wait_for(&mut state, self.options.fill_poll_interval());
                }
                if self.is_closed() || state.finished {
                    break;
                }
                state.write_offset
            };

            if stream.is_none() {
                let opened = self.backend.block_on_cancellable(
                    &self.cancel,
                    self.backend.client().open_range_stream(
                        &self.bucket,
                        &self.key,
                        ByteRange::from_offset(write_offset),
                    ),
                );
                match opened {
                    Ok(s) => {
                        debug!(reader = self.id, offset = write_offset, "Opened backend stream");
                        stream = Some(s);
                    }
                    Err(StorageError::Cancelled) => break,
                    Err(e) => {
                        if self.record_failure(&mut failures, &e) {
                            break;
                        }
                        std::thread::sleep(self.options.zero_read_pause());
                        continue;
                    }
                }
            }
            let Some(active) = stream.as_mut() else {
                continue;
            };

            let (data, outcome) = self.fetch_block(active.as_mut());

            if !data.is_empty() {
                failures = 0;
                let mut state = self.state.lock();
                if !self.is_closed() {
                    let len: u64 = data.len() as u64;
                    let block = Arc::new(BufferBlock::new(state.write_offset, data));
                    debug!(
                        reader = self.id,
                        offset = block.offset(),
                        len,
                        "Appended buffer block"
                    );
                    state.write_offset += len;
                    state.bytes_fetched += len;
                    state.blocks.push_back(block);
                    self.evict_idle(&mut state, Instant::now());
                }
            }

            match outcome {
                FetchEnd::Full => {}
                FetchEnd::Eof => {
                    let mut state = self.state.lock();
                    state.eof = true;
                    state.finished = true;
                    debug!(reader = self.id, end = state.write_offset, "Reached end of object");
                }
                FetchEnd::Failed(e) => {
                    // Next iteration reopens at the current write offset.
                    stream = None;
                    if self.record_failure(&mut failures, &e) {
                        break;
                    }
                }
                FetchEnd::Cancelled => break,
            }
            self.data_ready.notify_all();
        }

        drop(stream);
        self.state.lock().finished = true;
        self.data_ready.notify_all();
        debug!(reader = self.id, "Fill thread exiting");
    }

    /// Read one block's worth of bytes from `stream`.
    fn fetch_block(&self, stream: &mut dyn RangeStream) -> (Bytes, FetchEnd) {
        let block_size: usize = self.options.block_size;
        let mut buf = BytesMut::with_capacity(block_size);
        while buf.len() < block_size {
            if self.is_closed() {
                return (buf.freeze(), FetchEnd::Cancelled);
            }
            let want: usize = self.options.io_buffer_size.min(block_size - buf.len());
            match self
                .backend
                .block_on_cancellable(&self.cancel, stream.read_chunk(want))
            {
                Ok(Some(chunk)) if chunk.is_empty() => {
                    debug!(reader = self.id, "Zero-byte read, pausing");
                    std::thread::sleep(self.options.zero_read_pause());
                }
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                Ok(None) => return (buf.freeze(), FetchEnd::Eof),
                Err(StorageError::Cancelled) => return (buf.freeze(), FetchEnd::Cancelled),
                Err(e) => return (buf.freeze(), FetchEnd::Failed(e)),
            }
        }
        (buf.freeze(), FetchEnd::Full)
    }

    /// Count a failed fetch. Returns true once the reader has given up.
    fn record_failure(&self, failures: &mut u32, err: &StorageError) -> bool {
        *failures += 1;
        let max: u32 = self.options.max_fetch_failures;
        if *failures < max && err.is_retryable() {
            warn!(
                reader = self.id,
                key = %self.key,
                attempt = *failures,
                error = %err,
                "Backend fetch failed, retrying"
            );
            return false;
        }
        error!(
            reader = self.id,
            key = %self.key,
            attempts = *failures,
            error = %err,
            "Backend fetch failed, closing stream"
        );
        let mut state = self.state.lock();
        state.failure = Some(err.to_string());
        state.finished = true;
        true
    }
}
