//! # Logging
//!
//! Structured leveled logging for both binaries.
//!
//! `RUST_LOG` takes precedence; otherwise the configured level applies to
//! every target. An optional directory adds a daily rolling log file next to
//! the console output.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` if set, else `level`
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber
///
/// # Arguments
///
/// * `config` - Logging section of the configuration
/// * `file_prefix` - Log file name prefix, e.g. `cansat-gateway.log`
///
/// # Returns
///
/// The file writer guard, if file logging is enabled. Keep it alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init(config: &LoggingConfig, file_prefix: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let console = fmt::layer().with_filter(env_filter(&config.level));

    if config.directory.is_empty() {
        tracing_subscriber::registry().with(console).try_init()?;
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.directory, file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(env_filter(&config.level));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;

    Ok(Some(guard))
}
