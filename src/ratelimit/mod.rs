//! Sliding-window admission limiting and per-key state management.

mod backend;
mod clock;
mod entry;
mod key;
mod limiter;
mod policy;
mod sweeper;

pub use backend::AdmissionBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::LimiterEntry;
pub use key::{CallerKey, UNKNOWN_ADDR};
pub use limiter::SlidingWindowLimiter;
pub use policy::LimitPolicy;
pub use sweeper::{spawn_sweeper, sweep_once};
