//! Admission backend trait for abstracting where per-key state lives.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RateLimited;

use super::key::CallerKey;
use super::limiter::SlidingWindowLimiter;
use super::policy::LimitPolicy;

/// Trait for admission backends.
///
/// The HTTP layer only talks to this trait, so the in-process
/// `SlidingWindowLimiter` can be swapped for a store shared between
/// processes without touching the middleware.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Admit or reject one request for `key` at the backend's current time.
    async fn admit(&self, key: &CallerKey) -> Result<(), RateLimited>;

    /// The policy enforced by this backend.
    fn policy(&self) -> &LimitPolicy;

    /// Drop state for keys idle longer than `idle`. Returns how many were dropped.
    fn evict_idle(&self, idle: Duration) -> usize;

    /// Number of keys with live state.
    fn tracked_keys(&self) -> usize;
}

#[async_trait]
impl AdmissionBackend for SlidingWindowLimiter {
    async fn admit(&self, key: &CallerKey) -> Result<(), RateLimited> {
        self.admit_now(&key.as_key())
    }

    fn policy(&self) -> &LimitPolicy {
        SlidingWindowLimiter::policy(self)
    }

    fn evict_idle(&self, idle: Duration) -> usize {
        let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        SlidingWindowLimiter::evict_idle(self, self.clock().now_ms(), idle_ms)
    }

    fn tracked_keys(&self) -> usize {
        self.entry_count()
    }
}
