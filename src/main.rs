use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use periodix_limiter::config::PeriodixConfig;
use periodix_limiter::http::{HttpServer, Limiters};
use periodix_limiter::ratelimit::{spawn_sweeper, AdmissionBackend, SlidingWindowLimiter};

/// Sliding-window admission service for the Periodix timetable backend.
#[derive(Debug, Parser)]
#[command(name = "periodix-limiter", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "PERIODIX_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Periodix admission limiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = PeriodixConfig::load(args.config.as_deref())?;
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let rate_limiting = &config.rate_limiting;
    let colors: Arc<dyn AdmissionBackend> =
        Arc::new(SlidingWindowLimiter::new(rate_limiting.colors.clone())?);
    let timetable: Arc<dyn AdmissionBackend> =
        Arc::new(SlidingWindowLimiter::new(rate_limiting.timetable.clone())?);
    for limiter in [&colors, &timetable] {
        let policy = limiter.policy();
        info!(
            policy = %policy.name,
            window_ms = policy.window_ms,
            max_per_window = policy.max_per_window,
            "Limiter initialized"
        );
    }

    let sweeper = spawn_sweeper(
        vec![colors.clone(), timetable.clone()],
        Duration::from_secs(rate_limiting.sweep_interval_secs),
        rate_limiting.idle_window_multiple,
    );

    let server = HttpServer::new(
        config.server.http_addr,
        Limiters { colors, timetable },
        rate_limiting.trust_forwarded_for,
    );

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;
    sweeper.abort();
    served?;

    info!("Periodix admission limiter stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
