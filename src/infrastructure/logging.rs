//! Logging initialization using tracing.

use std::io;

use anyhow::Result;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Holds the file appender guard so buffered log lines flush on shutdown.
pub struct LogHandle {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global subscriber from configuration.
///
/// Stdout format follows `config.format` (json or pretty); when a log
/// directory is configured, a daily-rotated JSON file layer is added.
pub fn init(config: &LoggingConfig) -> Result<LogHandle> {
    let default_level = parse_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let guard = if config.directory.is_empty() {
        match config.format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(io::stdout)
                            .with_target(true)
                            .with_filter(env_filter),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(io::stdout)
                            .with_target(true)
                            .with_filter(env_filter),
                    )
                    .init();
            }
        }
        None
    } else {
        let appender = rolling::daily(&config.directory, "nydus.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter.clone());
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_target(true)
            .with_filter(env_filter);
        tracing_subscriber::registry()
            .with(file_layer)
            .with(stdout_layer)
            .init();
        Some(guard)
    };

    Ok(LogHandle { _guard: guard })
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => anyhow::bail!("invalid log level: {other}"),
    }
}
