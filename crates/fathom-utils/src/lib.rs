//! # Fathom Utilities
//!
//! Shared utilities for the Fathom workspace: environment-driven
//! configuration and logging built on `tracing`.

pub mod config;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ConfigError, LogFormat, LogLevel, LogSettings};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
