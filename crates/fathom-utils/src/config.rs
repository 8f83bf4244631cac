//! # Configuration
//!
//! Logging settings resolved from the environment, with command-line
//! overrides layered on top.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `debug`, `fathom_core=trace`)
//! - `FATHOM_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
//! - `FATHOM_LOG_FILE`: optional path of a daily-rolled log file
//!
//! ## Example
//!
//! ```rust
//! use fathom_utils::{LogFormat, LogLevel, LogSettings};
//!
//! let settings = LogSettings::from_lookup(|key| match key {
//!     "FATHOM_LOG_FORMAT" => Some("json".to_string()),
//!     _ => None,
//! })
//! .unwrap()
//! .with_level(Some(LogLevel::Debug));
//!
//! assert_eq!(settings.format, LogFormat::Json);
//! assert_eq!(settings.filter_directives(), "debug");
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;

/// Variable holding the output format
pub const FORMAT_VAR: &str = "FATHOM_LOG_FORMAT";
/// Variable holding the log file path
pub const FILE_VAR: &str = "FATHOM_LOG_FILE";
/// Standard `tracing` filter variable
pub const FILTER_VAR: &str = "RUST_LOG";

/// Filter used when neither `RUST_LOG` nor a level override is given
pub const DEFAULT_FILTER: &str = "warn";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable, with ANSI colors on the console
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        })
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Most verbose
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigError::InvalidLevel(s.to_string())),
        }
    }
}

/// Resolved logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogSettings
{
    /// Explicit level; takes precedence over `filter`
    pub level: Option<LogLevel>,
    /// Raw `RUST_LOG` directives
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Log file in addition to the console
    pub file: Option<PathBuf>,
}

impl LogSettings
{
    /// Settings from the process environment
    ///
    /// ## Errors
    ///
    /// `InvalidFormat` when `FATHOM_LOG_FORMAT` is set to something unknown.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Settings from an arbitrary variable lookup
    ///
    /// Empty values count as unset.
    ///
    /// ## Errors
    ///
    /// `InvalidFormat` when the format variable is set to something unknown.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError>
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let format = get(FORMAT_VAR).map(|value| value.parse()).transpose()?.unwrap_or_default();

        Ok(Self {
            level: None,
            filter: get(FILTER_VAR),
            format,
            file: get(FILE_VAR).map(PathBuf::from),
        })
    }

    /// Override the level, e.g. from `--log-level`
    #[must_use]
    pub fn with_level(mut self, level: Option<LogLevel>) -> Self
    {
        if level.is_some() {
            self.level = level;
        }
        self
    }

    /// Override the format, e.g. from `--log-format`
    #[must_use]
    pub fn with_format(mut self, format: Option<LogFormat>) -> Self
    {
        if let Some(format) = format {
            self.format = format;
        }
        self
    }

    /// Filter directives to build an `EnvFilter` from
    #[must_use]
    pub fn filter_directives(&self) -> String
    {
        match (&self.level, &self.filter) {
            (Some(level), _) => Level::from(*level).to_string().to_lowercase(),
            (None, Some(filter)) => filter.clone(),
            (None, None) => DEFAULT_FILTER.to_string(),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError
{
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),
}
