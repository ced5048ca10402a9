//! Core sliding-window admission limiter.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{RateLimited, Result};

use super::clock::{Clock, SystemClock};
use super::entry::LimiterEntry;
use super::policy::LimitPolicy;

/// Admits at most `max_per_window` requests per key in any trailing window.
///
/// This struct is thread-safe and can be shared across multiple tasks. Each
/// decision holds the key's map shard for the whole prune, decide, and append
/// sequence, so concurrent callers on one key are serialized.
pub struct SlidingWindowLimiter {
    /// Window size, budget and rejection payload
    policy: LimitPolicy,
    /// Admission history indexed by caller key
    entries: DashMap<String, LimiterEntry>,
    /// Time source for `admit_now`
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter on the wall clock.
    pub fn new(policy: LimitPolicy) -> Result<Self> {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source.
    pub fn with_clock(policy: LimitPolicy, clock: Arc<dyn Clock>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            entries: DashMap::new(),
            clock,
        })
    }

    /// Decide whether `key` may proceed at `now_ms`.
    ///
    /// The entry is created on first sight. On success `now_ms` is recorded;
    /// on rejection nothing is recorded and the wait is reported.
    pub fn admit(&self, key: &str, now_ms: u64) -> std::result::Result<(), RateLimited> {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.try_admit(now_ms, self.policy.window_ms, self.policy.max_per_window)
    }

    /// `admit` at the limiter clock's current time.
    pub fn admit_now(&self, key: &str) -> std::result::Result<(), RateLimited> {
        self.admit(key, self.clock.now_ms())
    }

    /// Admits recorded for `key` inside the window ending now.
    pub fn recent_count(&self, key: &str) -> usize {
        let now = self.clock.now_ms();
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.prune(now, self.policy.window_ms);
                entry.len()
            }
            None => 0,
        }
    }

    /// Timestamp of the last admit for `key`.
    pub fn last_allowed_at(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(|e| e.last_allowed_at())
    }

    /// Remove entries with no activity in the last `idle_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_idle(&self, now_ms: u64, idle_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.last_activity() {
            Some(last) => now_ms.saturating_sub(last) <= idle_ms,
            None => false,
        });
        before.saturating_sub(self.entries.len())
    }

    /// The limiter's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Number of keys currently tracked.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
