//! Per-key sliding window of admitted timestamps.

use std::collections::VecDeque;

use crate::error::RateLimited;

/// Recent admission history for a single caller key.
///
/// Timestamps are milliseconds since the Unix epoch, oldest first. After every
/// decision the window holds only timestamps within `window_ms` of the
/// decision time, and never more than `max_per_window` of them.
#[derive(Debug, Clone, Default)]
pub struct LimiterEntry {
    /// Admitted timestamps inside the trailing window
    recent_allowed: VecDeque<u64>,
    /// Most recent admitted request
    last_allowed_at: Option<u64>,
}

impl LimiterEntry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop timestamps older than the trailing window ending at `now_ms`.
    ///
    /// Timestamps later than `now_ms` are kept.
    pub fn prune(&mut self, now_ms: u64, window_ms: u64) {
        while let Some(&oldest) = self.recent_allowed.front() {
            if now_ms.saturating_sub(oldest) > window_ms {
                self.recent_allowed.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune, then admit `now_ms` if fewer than `max_per_window` admits remain.
    ///
    /// A rejected attempt is not recorded.
    pub fn try_admit(
        &mut self,
        now_ms: u64,
        window_ms: u64,
        max_per_window: usize,
    ) -> Result<(), RateLimited> {
        self.prune(now_ms, window_ms);

        if self.recent_allowed.len() >= max_per_window {
            return Err(RateLimited {
                retry_after_secs: self.retry_after_secs(now_ms, window_ms),
            });
        }

        self.recent_allowed.push_back(now_ms);
        self.last_allowed_at = Some(now_ms);
        Ok(())
    }

    /// Seconds until the oldest admit leaves the window, at least one.
    fn retry_after_secs(&self, now_ms: u64, window_ms: u64) -> u64 {
        let elapsed = self
            .recent_allowed
            .front()
            .map(|&oldest| now_ms.saturating_sub(oldest))
            .unwrap_or(0);
        let remaining_ms = window_ms.saturating_sub(elapsed);
        remaining_ms.div_ceil(1000).max(1)
    }

    /// Number of admits currently recorded.
    pub fn len(&self) -> usize {
        self.recent_allowed.len()
    }

    /// Whether no admits are recorded.
    pub fn is_empty(&self) -> bool {
        self.recent_allowed.is_empty()
    }

    /// Timestamp of the most recent admit, if any.
    pub fn last_allowed_at(&self) -> Option<u64> {
        self.last_allowed_at
    }

    /// The latest moment this entry saw activity.
    pub fn last_activity(&self) -> Option<u64> {
        self.last_allowed_at
            .or_else(|| self.recent_allowed.back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_admits_up_to_limit() {
        let mut entry = LimiterEntry::new();

        for _ in 0..3 {
            assert!(entry.try_admit(0, 1_000, 3).is_ok());
        }
        assert_eq!(entry.len(), 3);

        let rejected = entry.try_admit(10, 1_000, 3).unwrap_err();
        assert_eq!(rejected.retry_after_secs, 1);
        // Rejections are not recorded
        assert_eq!(entry.len(), 3);
        assert_eq!(entry.last_allowed_at(), Some(0));
    }

    #[test]
    fn test_prune_keeps_boundary_timestamp() {
        let mut entry = LimiterEntry::new();
        entry.try_admit(0, 5_000, 10).unwrap();
        entry.try_admit(2_000, 5_000, 10).unwrap();

        // now - t == W stays inside the window
        entry.prune(5_000, 5_000);
        assert_eq!(entry.len(), 2);

        entry.prune(5_001, 5_000);
        assert_eq!(entry.len(), 1);

        entry.prune(7_001, 5_000);
        assert!(entry.is_empty());
        assert_eq!(entry.last_allowed_at(), Some(2_000));
    }

    #[test]
    fn test_prune_keeps_future_timestamps() {
        let mut entry = LimiterEntry::new();
        entry.try_admit(10_000, 1_000, 5).unwrap();

        // The clock stepped backwards
        entry.prune(2_000, 1_000);
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let mut entry = LimiterEntry::new();
        entry.try_admit(0, 5_000, 1).unwrap();

        assert_eq!(entry.try_admit(100, 5_000, 1).unwrap_err().retry_after_secs, 5);
        assert_eq!(entry.try_admit(1_000, 5_000, 1).unwrap_err().retry_after_secs, 4);
        assert_eq!(entry.try_admit(4_999, 5_000, 1).unwrap_err().retry_after_secs, 1);
        // Exactly at the window edge the wait clamps to one second
        assert_eq!(entry.try_admit(5_000, 5_000, 1).unwrap_err().retry_after_secs, 1);
    }

    #[test]
    fn test_last_activity_tracks_newest_admit() {
        let mut entry = LimiterEntry::new();
        assert_eq!(entry.last_activity(), None);

        entry.try_admit(100, 1_000, 5).unwrap();
        entry.try_admit(300, 1_000, 5).unwrap();
        assert_eq!(entry.last_activity(), Some(300));
    }
}
