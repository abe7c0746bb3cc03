//! Structured logging setup.
//!
//! Installs a global `tracing-subscriber` fmt subscriber driven by
//! [`LoggingConfig`]. `RUST_LOG` overrides the configured level.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// # Errors
/// Returns `ProtocolError::LoggingError` if a global subscriber is already
/// installed or the filter directive is invalid.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_level.as_str().to_lowercase())
            .map_err(|e| ProtocolError::LoggingError(e.to_string()))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProtocolError::LoggingError(e.to_string()))?;

    info!(app = %config.app_name, level = %config.log_level, "logging initialized");
    Ok(())
}
