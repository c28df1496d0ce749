//! Cooldown blocking: explicit, time-bounded suspension of a key.

mod backend;
mod blocker;

pub use backend::BlockerBackend;
pub use blocker::CooldownBlocker;

use chrono::{DateTime, Utc};

/// Block status of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockState {
    /// When the block ends; the Unix epoch when the key is not blocked
    pub expires_at: DateTime<Utc>,
    /// Why the key was blocked; empty when not blocked or unparseable
    pub cause: String,
    /// Whether the block is still in force
    pub blocked: bool,
}

impl BlockState {
    /// State reported for keys without an active block.
    pub fn unblocked() -> Self {
        Self {
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            cause: String::new(),
            blocked: false,
        }
    }
}

impl Default for BlockState {
    fn default() -> Self {
        Self::unblocked()
    }
}
