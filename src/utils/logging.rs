//! Structured logging setup
//!
//! Installs a global `tracing` subscriber from a [`LoggingConfig`]. `RUST_LOG`
//! takes precedence over the configured level when it is set.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Result, ServerError};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ServerError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, "Logging initialized");
    Ok(())
}
