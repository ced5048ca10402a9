//! Error types for the Periodix admission limiter.

use thiserror::Error;

/// Rejection signalled by the limiter when a key has used up its window.
///
/// This is the limiter's only failure kind. It is always transient: once the
/// oldest recorded admit leaves the window, the key is admitted again.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limited, retry after {retry_after_secs}s")]
pub struct RateLimited {
    /// Whole seconds the caller should wait before retrying (always >= 1)
    pub retry_after_secs: u64,
}

/// Main error type for Periodix limiter operations.
#[derive(Error, Debug)]
pub enum PeriodixError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration source could not be read or merged
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Admission was refused
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Periodix limiter operations.
pub type Result<T> = std::result::Result<T, PeriodixError>;
