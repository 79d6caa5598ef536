//! Tracing setup shared by both binaries.
//!
//! Output goes to the console and, unless disabled, to a daily-rotated file
//! under `[logging] directory`. The redirect helper runs without a console,
//! so its file is the only record of what it did.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Opens the rolling file writer for one binary.
///
/// Returns `None` when file logging is disabled. Lines are flushed until the
/// guard is dropped.
pub fn file_writer(
    config: &LoggingConfig,
    file_prefix: &str,
) -> Result<Option<(NonBlocking, WorkerGuard)>> {
    if !config.file_enabled {
        return Ok(None);
    }

    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("Failed to create log directory {}", config.directory))?;
    let appender =
        tracing_appender::rolling::daily(&config.directory, format!("{}.log", file_prefix));
    Ok(Some(tracing_appender::non_blocking(appender)))
}

/// Installs the global subscriber. Keep the returned guard alive in `main`.
///
/// `RUST_LOG` overrides `default_filter`.
pub fn init(
    config: &LoggingConfig,
    file_prefix: &str,
    default_filter: &str,
) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match file_writer(config, file_prefix)? {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
