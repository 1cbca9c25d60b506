//! Tracing subscriber setup for applications built on the device manager.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the binary. `RUST_LOG` takes precedence over the configured
//! level.

use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{ManagerConfig, VALID_LOG_LEVELS};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Level name not understood.
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    /// `RUST_LOG` could not be parsed.
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    /// The subscriber could not be installed.
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Filter for `level`, overridden by non-empty `directives` (the value of
/// `RUST_LOG`).
///
/// # Errors
/// - [`LoggingError::InvalidLevel`] for an unknown level name
/// - [`LoggingError::InvalidFilter`] for malformed directives
pub fn build_filter(level: &str, directives: Option<&str>) -> Result<EnvFilter, LoggingError> {
    if !VALID_LOG_LEVELS.contains(&level) {
        return Err(LoggingError::InvalidLevel(level.to_string()));
    }

    match directives.map(str::trim) {
        Some(directives) if !directives.is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| LoggingError::InvalidFilter(e.to_string())),
        _ => Ok(EnvFilter::new(level)),
    }
}

/// Install a global fmt subscriber filtered at `level`.
///
/// Does nothing if a global subscriber is already installed.
///
/// # Errors
/// - [`LoggingError::InvalidLevel`] for an unknown level name
/// - [`LoggingError::InvalidFilter`] if `RUST_LOG` is set but malformed
/// - [`LoggingError::Install`] if installation fails
pub fn init_tracing(level: &str) -> Result<(), LoggingError> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, directives.as_deref())?;

    if tracing::dispatcher::has_been_set() {
        debug!(level = %level, "Tracing subscriber already installed");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}

/// Install the subscriber at the level named in `config`.
///
/// # Errors
/// Same as [`init_tracing`].
pub fn init_from_config(config: &ManagerConfig) -> Result<(), LoggingError> {
    init_tracing(&config.manager.log_level)
}
