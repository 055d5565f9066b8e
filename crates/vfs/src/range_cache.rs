//! Per-path cache of fetched byte ranges.
//!
//! # Design
//!
//! Each path maps to an offset-ordered `BTreeMap<u64, Bytes>` of disjoint
//! ranges. An insert is clipped against every range it overlaps and only the
//! uncovered gaps are stored, each as a zero-copy slice of the inserted
//! buffer. A fully covered insert is discarded. Adjacent ranges are not
//! coalesced; lookups return the range containing the offset and callers
//! fold consecutive hits.
//!
//! Inserts for one path are serialized by a per-path lock. Memory is bounded
//! by a byte budget and by an idle sweep. Over budget, least recently used
//! paths go first; if the inserting path alone is still too large, its ranges
//! furthest behind the insert are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::options::RangeCacheOptions;
use crate::reaper::IdleSweep;
use crate::stamp::AccessStamp;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    /// All requested bytes.
    Full(Bytes),
    /// A non-empty prefix of the requested bytes.
    Partial(Bytes),
}

impl CacheHit {
    pub fn bytes(&self) -> &Bytes {
        match self {
            CacheHit::Full(b) | CacheHit::Partial(b) => b,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            CacheHit::Full(b) | CacheHit::Partial(b) => b,
        }
    }
}

/// Result of a cache insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Uncovered parts of the insert were stored.
    Stored { pieces: usize, bytes: u64 },
    /// Every byte was already cached.
    Redundant,
    /// A stored piece would have overlapped an existing range; nothing further stored.
    Rejected,
}

/// Counters describing cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeCacheStats {
    pub paths: usize,
    pub ranges: usize,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct PathRanges {
    ranges: BTreeMap<u64, Bytes>,
    bytes: u64,
    stamp: AccessStamp,
    /// Set once the path is dropped from the cache; inserts must re-resolve.
    detached: bool,
}

impl PathRanges {
    /// Half-open spans `[start, end)` of `[start, end)` not yet cached.
    fn gaps(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        let mut gaps: Vec<(u64, u64)> = Vec::new();
        let mut cursor: u64 = start;
        if let Some((&s, d)) = self.ranges.range(..=start).next_back() {
            cursor = cursor.max(s + d.len() as u64);
        }
        for (&s, d) in self.ranges.range(start..end) {
            if s > cursor {
                gaps.push((cursor, s));
            }
            cursor = cursor.max(s + d.len() as u64);
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        gaps
    }

    /// Whether `[start, end)` overlaps any stored range.
    fn overlaps(&self, start: u64, end: u64) -> bool {
        if let Some((&s, d)) = self.ranges.range(..=start).next_back() {
            if s + d.len() as u64 > start {
                return true;
            }
        }
        self.ranges.range(start..end).next().is_some()
    }
}

/// Cache of previously fetched byte ranges, keyed by path.
pub struct RangeCache {
    max_bytes: u64,
    idle_timeout: Duration,
    paths: Mutex<HashMap<String, Arc<Mutex<PathRanges>>>>,
    total_bytes: AtomicU64,
}

impl RangeCache {
    /// Create an empty cache.
    pub fn new(options: &RangeCacheOptions) -> Self {
        Self {
            max_bytes: options.max_bytes,
            idle_timeout: options.idle_timeout(),
            paths: Mutex::new(HashMap::new()),
            total_bytes: AtomicU64::new(0),
        }
    }

    fn entry(&self, path: &str) -> Arc<Mutex<PathRanges>> {
        self.paths
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Store `data` fetched at `offset` of `path`.
    ///
    /// Bytes already cached are dropped from the insert; only the gaps are
    /// stored. The cache never holds two overlapping ranges for a path.
    ///
    /// # Arguments
    /// * `path` - File path the bytes belong to
    /// * `offset` - Object offset of `data[0]`
    /// * `data` - Fetched bytes
    pub fn insert(&self, path: &str, offset: u64, data: Bytes) -> InsertOutcome {
        if data.is_empty() {
            return InsertOutcome::Redundant;
        }
        let end: u64 = offset + data.len() as u64;

        let outcome: InsertOutcome = loop {
            let entry: Arc<Mutex<PathRanges>> = self.entry(path);
            let mut ranges = entry.lock();
            if ranges.detached {
                continue;
            }
            ranges.stamp.touch();

            let gaps: Vec<(u64, u64)> = ranges.gaps(offset, end);
            if gaps.is_empty() {
                warn!(path, offset, len = data.len(), "Discarding redundant cache insert");
                break InsertOutcome::Redundant;
            }

            let mut pieces: usize = 0;
            let mut stored: u64 = 0;
            let mut rejected: bool = false;
            for (gap_start, gap_end) in gaps {
                if ranges.overlaps(gap_start, gap_end) {
                    error!(
                        path,
                        gap_start, gap_end, "Cache insert would overlap an existing range, skipping"
                    );
                    rejected = true;
                    break;
                }
                let piece: Bytes =
                    data.slice((gap_start - offset) as usize..(gap_end - offset) as usize);
                ranges.ranges.insert(gap_start, piece);
                pieces += 1;
                stored += gap_end - gap_start;
            }
            ranges.bytes += stored;
            self.total_bytes.fetch_add(stored, Ordering::SeqCst);

            if rejected && pieces == 0 {
                break InsertOutcome::Rejected;
            }
            debug!(path, offset, pieces, stored, "Cached range");
            break InsertOutcome::Stored {
                pieces,
                bytes: stored,
            };
        };

        if self.total_bytes.load(Ordering::SeqCst) > self.max_bytes {
            self.enforce_budget(path, offset, end);
        }
        outcome
    }

    /// Look up `[offset, offset + length)` of `path`.
    ///
    /// # Returns
    /// `Full` if one cached range covers the request, `Partial` with the
    /// available prefix if a range covers `offset` but ends early, None on a miss.
    pub fn lookup(&self, path: &str, offset: u64, length: usize) -> Option<CacheHit> {
        if length == 0 {
            return None;
        }
        let entry: Arc<Mutex<PathRanges>> = self.paths.lock().get(path)?.clone();
        let ranges = entry.lock();
        let (&start, data) = ranges.ranges.range(..=offset).next_back()?;
        let range_end: u64 = start + data.len() as u64;
        if offset >= range_end {
            return None;
        }
        ranges.stamp.touch();

        let available: usize = ((range_end - offset) as usize).min(length);
        let from: usize = (offset - start) as usize;
        let bytes: Bytes = data.slice(from..from + available);
        if available == length {
            Some(CacheHit::Full(bytes))
        } else {
            Some(CacheHit::Partial(bytes))
        }
    }

    /// Stored ranges for `path` as `(offset, len)`, in offset order.
    pub fn ranges(&self, path: &str) -> Vec<(u64, usize)> {
        let Some(entry) = self.paths.lock().get(path).cloned() else {
            return Vec::new();
        };
        let ranges = entry.lock();
        ranges.ranges.iter().map(|(&s, d)| (s, d.len())).collect()
    }

    /// Drop everything cached for `path`.
    pub fn remove(&self, path: &str) {
        let removed: Option<Arc<Mutex<PathRanges>>> = self.paths.lock().remove(path);
        if let Some(entry) = removed {
            self.detach(&entry);
        }
    }

    pub fn stats(&self) -> RangeCacheStats {
        let entries: Vec<Arc<Mutex<PathRanges>>> = self.paths.lock().values().cloned().collect();
        let mut stats = RangeCacheStats {
            paths: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            let ranges = entry.lock();
            stats.ranges += ranges.ranges.len();
            stats.bytes += ranges.bytes;
        }
        stats
    }

    fn detach(&self, entry: &Arc<Mutex<PathRanges>>) {
        let mut ranges = entry.lock();
        ranges.detached = true;
        self.total_bytes.fetch_sub(ranges.bytes, Ordering::SeqCst);
    }

    /// Drop least recently used paths, other than `keep`, until under budget.
    /// If `keep` alone is still over, trim its own ranges around
    /// `[offset, end)`, the span just inserted.
    fn enforce_budget(&self, keep: &str, offset: u64, end: u64) {
        let mut paths = self.paths.lock();
        let mut candidates: Vec<(Instant, String)> = paths
            .iter()
            .filter(|(p, _)| p.as_str() != keep)
            .map(|(p, e)| (e.lock().stamp.last_access(), p.clone()))
            .collect();
        candidates.sort();

        for (_, path) in candidates {
            if self.total_bytes.load(Ordering::SeqCst) <= self.max_bytes {
                break;
            }
            if let Some(entry) = paths.remove(&path) {
                self.detach(&entry);
                debug!(path = %path, "Evicted cached path over byte budget");
            }
        }

        if self.total_bytes.load(Ordering::SeqCst) <= self.max_bytes {
            return;
        }
        if let Some(entry) = paths.get(keep).cloned() {
            self.trim_path(keep, &entry, offset, end);
        }
    }

    /// Drop ranges of one path until the cache is under budget.
    ///
    /// Ranges below `offset` go first, lowest offset first, then ranges past
    /// `end`, highest offset first. Ranges inside `[offset, end)` go last, only
    /// when the insert alone exceeds the budget.
    fn trim_path(&self, path: &str, entry: &Arc<Mutex<PathRanges>>, offset: u64, end: u64) {
        let mut ranges = entry.lock();
        if ranges.detached {
            return;
        }
        let behind = ranges.ranges.range(..offset).map(|(&s, _)| s);
        let ahead = ranges.ranges.range(end..).rev().map(|(&s, _)| s);
        let inside = ranges.ranges.range(offset..end).map(|(&s, _)| s);
        let order: Vec<u64> = behind.chain(ahead).chain(inside).collect();

        let mut dropped: usize = 0;
        for start in order {
            if self.total_bytes.load(Ordering::SeqCst) <= self.max_bytes {
                break;
            }
            if let Some(data) = ranges.ranges.remove(&start) {
                let len: u64 = data.len() as u64;
                ranges.bytes -= len;
                self.total_bytes.fetch_sub(len, Ordering::SeqCst);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(path, dropped, "Trimmed cached ranges over byte budget");
        }
    }
}

impl IdleSweep for RangeCache {
    fn sweep_idle(&self, now: Instant) -> usize {
        let mut paths = self.paths.lock();
        let idle: Vec<String> = paths
            .iter()
            .filter(|(_, e)| e.lock().stamp.idle_for(now) > self.idle_timeout)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &idle {
            if let Some(entry) = paths.remove(path) {
                self.detach(&entry);
            }
        }
        idle.len()
    }
}
