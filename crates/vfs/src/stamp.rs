//! Lock-free last-access timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last-access time that can be updated through a shared reference.
///
/// Stored as milliseconds since a fixed origin so it fits in an atomic.
#[derive(Debug)]
pub struct AccessStamp {
    origin: Instant,
    elapsed_ms: AtomicU64,
}

impl AccessStamp {
    /// Create a stamp touched at the current time.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_ms: AtomicU64::new(0),
        }
    }

    /// Record an access now.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Record an access at `now`. Never moves the stamp backwards.
    pub fn touch_at(&self, now: Instant) {
        let ms: u64 = now.saturating_duration_since(self.origin).as_millis() as u64;
        self.elapsed_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Time of the most recent access.
    pub fn last_access(&self) -> Instant {
        self.origin + Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }

    /// How long the stamp has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access())
    }
}

impl Default for AccessStamp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_grows_until_touched() {
        let stamp = AccessStamp::new();
        let later: Instant = Instant::now() + Duration::from_secs(5);
        assert!(stamp.idle_for(later) >= Duration::from_secs(4));

        stamp.touch_at(later);
        assert_eq!(stamp.idle_for(later), Duration::ZERO);
    }

    #[test]
    fn test_touch_never_goes_backwards() {
        let stamp = AccessStamp::new();
        let later: Instant = Instant::now() + Duration::from_secs(5);
        stamp.touch_at(later);
        stamp.touch_at(Instant::now());
        assert!(stamp.last_access() + Duration::from_millis(1) >= later);
    }
}
