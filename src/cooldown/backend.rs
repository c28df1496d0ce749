//! Blocker trait for abstracting over backing stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::BlockState;
use crate::error::Result;

/// Trait for cooldown blocker implementations.
#[async_trait]
pub trait BlockerBackend: Send + Sync {
    /// Block `key` until `expiry`. An expiry that is not in the future is
    /// ignored.
    async fn block_until(&self, key: &str, cause: &str, expiry: DateTime<Utc>) -> Result<()>;

    /// Read the current block for `key`.
    async fn state(&self, key: &str) -> Result<BlockState>;

    /// Remove any block for `key`.
    async fn clean(&self, key: &str) -> Result<()>;
}
