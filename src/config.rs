//! Configuration management for the Periodix limiter service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{PeriodixError, Result};
use crate::ratelimit::LimitPolicy;

/// Prefix for environment overrides, e.g. `PERIODIX__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "PERIODIX";

/// Main configuration for the limiter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodixConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Policy guarding lesson-color preference writes
    #[serde(default = "LimitPolicy::lesson_colors")]
    pub colors: LimitPolicy,

    /// Policy guarding upstream timetable-provider calls
    #[serde(default = "LimitPolicy::timetable_upstream")]
    pub timetable: LimitPolicy,

    /// How often idle entries are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Entries idle for this many windows are evicted
    #[serde(default = "default_idle_window_multiple")]
    pub idle_window_multiple: u32,

    /// Take the caller address from the first `X-Forwarded-For` hop
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            colors: LimitPolicy::lesson_colors(),
            timetable: LimitPolicy::timetable_upstream(),
            sweep_interval_secs: default_sweep_interval(),
            idle_window_multiple: default_idle_window_multiple(),
            trust_forwarded_for: false,
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_window_multiple() -> u32 {
    10
}

impl PeriodixConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// Anything the YAML leaves out, down to single policy fields, keeps its
    /// default.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let source = config::File::from_str(yaml, config::FileFormat::Yaml);
        Self::build(config::Config::builder().add_source(source))
    }

    /// Load configuration from an optional YAML file, then apply
    /// `PERIODIX__*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder =
                builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        Self::build(
            builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    /// Layer `sources` over the defaults, deserialize, and validate.
    fn build(sources: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let defaults = config::Config::try_from(&PeriodixConfig::default())?;
        let config: PeriodixConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(sources.build()?)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check both limiter policies and the sweep settings.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.colors.validate()?;
        self.rate_limiting.timetable.validate()?;
        if self.rate_limiting.colors.name == self.rate_limiting.timetable.name {
            return Err(PeriodixError::Config(format!(
                "policy names must be distinct, both are '{}'",
                self.rate_limiting.colors.name
            )));
        }
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(PeriodixError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
