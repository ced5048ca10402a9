//! Limit policies: window size, admit budget, and the rejection payload.
//!
//! Two policies ship as presets. `lesson_colors` guards lesson-color
//! preference writes, and `timetable_upstream` shields the upstream
//! timetable provider from bursts of lookups.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{PeriodixError, Result};

/// Configuration for one sliding-window limiter instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// Short name used in routes and logs
    pub name: String,
    /// Length of the trailing window in milliseconds
    pub window_ms: u64,
    /// Maximum admits per key inside one window
    pub max_per_window: usize,
    /// User-visible message returned on rejection
    pub message: String,
    /// Whether rejections carry a `Retry-After` header and `retryAfter` field
    #[serde(default)]
    pub advertise_retry_after: bool,
}

impl LimitPolicy {
    /// Lesson-color preference writes: 300 per minute.
    pub fn lesson_colors() -> Self {
        Self {
            name: "colors".to_string(),
            window_ms: 60_000,
            max_per_window: 300,
            message: "Too many color requests (300/min). Please slow down briefly.".to_string(),
            advertise_retry_after: false,
        }
    }

    /// Upstream timetable-provider calls: 6 per 5 seconds.
    pub fn timetable_upstream() -> Self {
        Self {
            name: "timetable".to_string(),
            window_ms: 5_000,
            max_per_window: 6,
            message: "Too many WebUntis requests. Please try again shortly.".to_string(),
            advertise_retry_after: true,
        }
    }

    /// The window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Upper bound on any `retry_after_secs` this policy can produce.
    pub fn max_retry_after_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000).max(1)
    }

    /// Reject policies that could never admit anything.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PeriodixError::Config("policy name must not be empty".to_string()));
        }
        if self.window_ms == 0 {
            return Err(PeriodixError::Config(format!(
                "policy '{}': window_ms must be greater than zero",
                self.name
            )));
        }
        if self.max_per_window == 0 {
            return Err(PeriodixError::Config(format!(
                "policy '{}': max_per_window must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }

    /// JSON body sent with a 429 response.
    pub fn rejection_body(&self, retry_after_secs: u64) -> Value {
        if self.advertise_retry_after {
            json!({ "error": self.message, "retryAfter": retry_after_secs })
        } else {
            json!({ "error": self.message })
        }
    }
}
