//! Tracing subscriber setup for embedding applications

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use drivefs_core::config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins, the configured level is the fallback
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global fmt subscriber
///
/// # Errors
/// Fails when another global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
