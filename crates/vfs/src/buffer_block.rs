//! Immutable windows of fetched bytes.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::stamp::AccessStamp;

/// Bytes fetched from the backend starting at a known object offset.
///
/// The payload never changes after construction. Only the access stamp moves,
/// on every read that touches the block.
#[derive(Debug)]
pub struct BufferBlock {
    offset: u64,
    data: Bytes,
    stamp: AccessStamp,
}

impl BufferBlock {
    /// Create a block holding `data` at object offset `offset`.
    pub fn new(offset: u64, data: Bytes) -> Self {
        Self {
            offset,
            data,
            stamp: AccessStamp::new(),
        }
    }

    /// Object offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end offset: `offset + len`.
    pub fn max_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Whether `loc` lies in `[offset, max_offset)`.
    pub fn within(&self, loc: u64) -> bool {
        self.offset <= loc && loc < self.max_offset()
    }

    /// Read the byte at `loc`.
    ///
    /// # Returns
    /// The byte, or None if `loc` is outside the block.
    pub fn read(&self, loc: u64) -> Option<u8> {
        if !self.within(loc) {
            return None;
        }
        self.stamp.touch();
        Some(self.data[(loc - self.offset) as usize])
    }

    /// Zero-copy view of up to `len` bytes starting at `loc`.
    ///
    /// # Arguments
    /// * `loc` - Object offset, must satisfy `within(loc)`
    /// * `len` - Maximum bytes wanted
    ///
    /// # Returns
    /// The bytes from `loc` to the lesser of `loc + len` and the block end,
    /// or an empty slice if `loc` is outside the block.
    pub fn slice_from(&self, loc: u64, len: usize) -> Bytes {
        if !self.within(loc) {
            return Bytes::new();
        }
        self.stamp.touch();
        let start: usize = (loc - self.offset) as usize;
        let end: usize = start.saturating_add(len).min(self.data.len());
        self.data.slice(start..end)
    }

    /// Time of the most recent read.
    pub fn last_access(&self) -> Instant {
        self.stamp.last_access()
    }

    /// How long the block has gone unread as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.stamp.idle_for(now)
    }
}
