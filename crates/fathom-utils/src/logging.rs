//! # Logging Utilities
//!
//! Logging infrastructure for Fathom using `tracing`.
//!
//! Console output goes to stderr so it never mixes with evaluation results
//! on stdout. Supports:
//! - Pretty (development) and JSON (machine-readable) formats
//! - `RUST_LOG` filter directives, or an explicit level override
//! - An optional daily-rolled log file next to the console output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fathom_utils::{init_logging, LogSettings};
//!
//! let _guard = init_logging(&LogSettings::from_env()?)?;
//! tracing::info!("Application started");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogSettings};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer's background thread alive
///
/// Dropping it flushes pending file output. Hold it until the program exits.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug)]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `settings`
///
/// ## Example
///
/// ```rust,no_run
/// use fathom_utils::{init_logging, LogFormat, LogLevel, LogSettings};
///
/// let settings = LogSettings::default()
///     .with_level(Some(LogLevel::Debug))
///     .with_format(Some(LogFormat::Json));
/// let _guard = init_logging(&settings).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// - `InvalidFilter`: the filter directives don't parse
/// - `InitializationFailed`: a global subscriber is already installed
pub fn init_logging(settings: &LogSettings) -> Result<LoggingGuard, LoggingError>
{
    let directives = settings.filter_directives();
    let filter = || EnvFilter::try_new(&directives).map_err(|err| LoggingError::InvalidFilter(format!("{directives}: {err}")));

    let mut layers: Vec<BoxedLayer> = vec![console_layer(settings.format).with_filter(filter()?).boxed()];
    let mut file_guard = None;
    if let Some(path) = &settings.file {
        let (layer, guard) = file_layer(path, settings.format);
        layers.push(layer.with_filter(filter()?).boxed());
        file_guard = Some(guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    tracing::debug!(filter = %directives, format = %settings.format, file = ?settings.file, "logging initialized");
    Ok(LoggingGuard { _file: file_guard })
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat) -> (BoxedLayer, WorkerGuard)
{
    let directory = path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name().unwrap_or_default();
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));

    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    let layer = match format {
        LogFormat::Pretty => layer.with_ansi(false).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    };
    (layer, guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// `RUST_LOG`-style directives that don't parse
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_invalid_filter_is_reported()
    {
        let settings = LogSettings {
            filter: Some("fathom_core=notalevel".to_string()),
            ..LogSettings::default()
        };
        let err = init_logging(&settings).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter(_)), "{err}");
    }
}
