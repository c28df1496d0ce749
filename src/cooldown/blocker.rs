//! Ordered-set backed cooldown blocker.
//!
//! A key's block record is an ordered set scored by block expiry in epoch
//! seconds. Writing a block first prunes every member that ends at or before
//! the new expiry, so the highest-scored member is always the authoritative
//! block and history never accumulates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::backend::BlockerBackend;
use super::BlockState;
use crate::clock::Clock;
use crate::error::Result;
use crate::keys::KeySpace;
use crate::store::{Batch, OrderedSetStore, ScoredMember};

/// Separator between the unique prefix and the cause in a stored member.
const CAUSE_SEPARATOR: char = ':';

/// Cooldown blocker backed by an [`OrderedSetStore`].
pub struct CooldownBlocker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
    /// Retention applied to a block record on every write
    max_age: Duration,
}

impl<S: OrderedSetStore> CooldownBlocker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, keys: KeySpace, max_age: Duration) -> Self {
        Self {
            store,
            clock,
            keys,
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Block `key` until `expiry`, recording `cause`.
    ///
    /// Expiries are kept at whole-second precision. An expiry at or before the
    /// current second is a no-op. A block ending before an existing one leaves
    /// the existing one authoritative.
    pub async fn block_until(&self, key: &str, cause: &str, expiry: DateTime<Utc>) -> Result<()> {
        let now = self.clock.now();
        let score = expiry.timestamp();
        if score <= now.timestamp() {
            trace!(key = %key, expiry = %expiry, "Ignoring block that has already ended");
            return Ok(());
        }

        if (expiry - now).to_std().is_ok_and(|length| length > self.max_age) {
            warn!(
                key = %key,
                expiry = %expiry,
                max_age = ?self.max_age,
                "Block outlives record retention and will be cut short"
            );
        }

        let member = format!("{}{}{}", Uuid::new_v4(), CAUSE_SEPARATOR, cause);
        let batch = Batch::new(self.keys.blocker(key))
            .remove_range_by_score(score)
            .add(vec![ScoredMember::new(member, score)])
            .expire(self.max_age);
        self.store.execute(&batch).await?;

        info!(key = %key, cause = %cause, expiry = %expiry, "Key blocked");
        Ok(())
    }

    /// Read the current block for `key`.
    pub async fn state(&self, key: &str) -> Result<BlockState> {
        let Some(top) = self.store.top(&self.keys.blocker(key)).await? else {
            return Ok(BlockState::unblocked());
        };

        let now = self.clock.now();
        match DateTime::from_timestamp(top.score, 0) {
            Some(expires_at) if expires_at > now => {
                let state = BlockState {
                    expires_at,
                    cause: parse_cause(&top.member),
                    blocked: true,
                };
                trace!(key = %key, cause = %state.cause, expiry = %expires_at, "Key is blocked");
                Ok(state)
            }
            _ => Ok(BlockState::unblocked()),
        }
    }

    /// Remove any block for `key`.
    pub async fn clean(&self, key: &str) -> Result<()> {
        debug!(key = %key, "Clearing block record");
        self.store.delete(&self.keys.blocker(key)).await
    }
}

/// Extract the cause from a stored member, tolerating malformed records.
fn parse_cause(member: &str) -> String {
    member
        .split_once(CAUSE_SEPARATOR)
        .map(|(_, cause)| cause.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl<S: OrderedSetStore> BlockerBackend for CooldownBlocker<S> {
    async fn block_until(&self, key: &str, cause: &str, expiry: DateTime<Utc>) -> Result<()> {
        self.block_until(key, cause, expiry).await
    }

    async fn state(&self, key: &str) -> Result<BlockState> {
        self.state(key).await
    }

    async fn clean(&self, key: &str) -> Result<()> {
        self.clean(key).await
    }
}
