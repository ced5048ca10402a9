//! Background eviction of idle limiter entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::AdmissionBackend;

/// Spawn a task that periodically evicts idle keys from every backend.
///
/// A key is idle once it has seen no admit for `idle_multiple` windows of its
/// backend's policy. The returned handle should be aborted on shutdown.
pub fn spawn_sweeper(
    backends: Vec<Arc<dyn AdmissionBackend>>,
    interval: Duration,
    idle_multiple: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&backends, idle_multiple);
        }
    })
}

/// Run one eviction pass. Returns the total number of keys removed.
pub fn sweep_once(backends: &[Arc<dyn AdmissionBackend>], idle_multiple: u32) -> usize {
    let mut total = 0;
    for backend in backends {
        let idle = backend.policy().window().saturating_mul(idle_multiple.max(1));
        let removed = backend.evict_idle(idle);
        if removed > 0 {
            debug!(
                policy = %backend.policy().name,
                removed,
                remaining = backend.tracked_keys(),
                "Evicted idle limiter entries"
            );
        }
        total += removed;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::{CallerKey, LimitPolicy, SlidingWindowLimiter};

    #[tokio::test]
    async fn test_sweep_once_uses_policy_window() {
        let clock = Arc::new(ManualClock::new(0));
        let timetable: Arc<dyn AdmissionBackend> = Arc::new(
            SlidingWindowLimiter::with_clock(LimitPolicy::timetable_upstream(), clock.clone())
                .unwrap(),
        );
        let colors: Arc<dyn AdmissionBackend> = Arc::new(
            SlidingWindowLimiter::with_clock(LimitPolicy::lesson_colors(), clock.clone()).unwrap(),
        );

        let key = CallerKey::User("7".to_string());
        timetable.admit(&key).await.unwrap();
        colors.admit(&key).await.unwrap();

        // Two timetable windows (10s) have passed, but not two color windows
        clock.set(10_001);
        let backends = vec![timetable.clone(), colors.clone()];
        assert_eq!(sweep_once(&backends, 2), 1);
        assert_eq!(timetable.tracked_keys(), 0);
        assert_eq!(colors.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_on_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(
            SlidingWindowLimiter::with_clock(LimitPolicy::timetable_upstream(), clock.clone())
                .unwrap(),
        );
        limiter.admit_now("ip:10.0.0.1").unwrap();
        clock.set(60_000);

        let backend: Arc<dyn AdmissionBackend> = limiter.clone();
        let handle = spawn_sweeper(vec![backend], Duration::from_secs(30), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(limiter.entry_count(), 0);

        handle.abort();
    }
}
