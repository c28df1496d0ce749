//! Error types for limitgate.

use std::time::Duration;

use thiserror::Error;

/// Main error type for limitgate operations.
#[derive(Error, Debug)]
pub enum LimitgateError {
    /// Configuration-related errors, including an unreachable store at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A group name or window rejected at the registration boundary
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Remote store errors
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A store round-trip exceeded the configured operation timeout
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The in-memory store has been switched offline
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for limitgate operations.
pub type Result<T> = std::result::Result<T, LimitgateError>;
