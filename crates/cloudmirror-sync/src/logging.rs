//! Tracing subscriber setup for hosts embedding the sync core

use cloudmirror_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global fmt subscriber
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    if config.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install JSON subscriber: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
    }
}
