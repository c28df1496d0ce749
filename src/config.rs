//! Configuration management for limitgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimitgateError, Result};

/// Prefix for environment variable overrides, e.g. `LIMITGATE_STORE__URL`.
const ENV_PREFIX: &str = "LIMITGATE";

/// Main configuration for a limitgate deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitgateConfig {
    /// Remote store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Cooldown blocker configuration
    #[serde(default)]
    pub blocker: BlockerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Group policies registered at startup
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Remote store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Namespace prefix for every key written by limitgate
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on a single store round-trip, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Upper bound on establishing the initial connection, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            key_prefix: default_key_prefix(),
            operation_timeout_ms: default_operation_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings under which no store call could ever succeed.
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(LimitgateError::Config(
                "store.operation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(LimitgateError::Config(
                "store.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "limiter".to_string()
}

fn default_operation_timeout() -> u64 {
    3000
}

fn default_connect_timeout() -> u64 {
    4000
}

/// Cooldown blocker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockerConfig {
    /// Retention applied to a block record on every write, in seconds.
    ///
    /// Blocks that end later than this are cut short when the record expires.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age(),
        }
    }
}

impl BlockerConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// A zero retention would expire every block record as it is written.
    pub fn validate(&self) -> Result<()> {
        if self.max_age_secs == 0 {
            return Err(LimitgateError::Config(
                "blocker.max_age_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_age() -> u64 {
    30 * 86400
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// A group policy as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name
    pub name: String,
    /// Maximum weighted events per window
    pub max: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl GroupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl LimitgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limitgate configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| LimitgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered under `LIMITGATE_*`
    /// environment variables.
    ///
    /// Nested keys use a double underscore, so `LIMITGATE_STORE__URL` sets
    /// `store.url`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading limitgate configuration");
            builder = builder.add_source(config::File::with_name(path));
        }

        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimitgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values that would make the gate inert.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.blocker.validate()
    }
}
