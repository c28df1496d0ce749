//! Tracing subscriber setup for hosts embedding limitgate.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{LimitgateError, Result};

/// Build the filter: `RUST_LOG` when set, the configured level otherwise.
fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LimitgateError::Config(format!("Invalid log level '{}': {}", config.level, e))),
    }
}

/// Install a global tracing subscriber.
///
/// # Errors
/// Fails if the level directive is invalid or a global subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_target(false)
        .with_thread_ids(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| LimitgateError::Config(format!("Failed to install subscriber: {}", e)))
}
