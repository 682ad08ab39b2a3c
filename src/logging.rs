//! Logging setup for the hub using tracing.
//!
//! `serve` writes JSON lines to a daily rolling file and human-readable
//! output to stderr. Short commands only log to stderr.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "pheromone-hub.log";

/// `RUST_LOG` when set, otherwise `default`.
fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Log to `log_dir` and stderr. Keep the guard alive to flush the file.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter("info,pheromone_hub=debug"))
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(file_writer),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .context("Logging already initialized")?;

    tracing::info!(log_dir = %log_dir.display(), "Logging initialized");
    Ok(guard)
}

/// Console-only logging for short-lived commands.
pub fn init_console() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter("warn"))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Logging already initialized")
}
