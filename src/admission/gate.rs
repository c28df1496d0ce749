//! Admission façade composing the limiter, blocker and group registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument};

use super::Decision;
use crate::clock::{Clock, SystemClock};
use crate::config::LimitgateConfig;
use crate::cooldown::{BlockState, BlockerBackend, CooldownBlocker};
use crate::error::Result;
use crate::keys::KeySpace;
use crate::ratelimit::{
    validate_group_name, GroupPolicy, GroupRegistry, RateLimiterBackend, SlidingWindowLimiter,
};
use crate::store::{OrderedSetStore, RedisStore};

/// Gate backed by Redis for both limiter and blocker.
pub type RedisGate = Gate<SlidingWindowLimiter<RedisStore>, CooldownBlocker<RedisStore>>;

/// Entry point for the surrounding framework.
///
/// The registry handed to [`Gate::new`] must be the one the limiter resolves
/// policies from; [`Gate::with_store`] wires this up.
pub struct Gate<L, B> {
    registry: Arc<GroupRegistry>,
    limiter: Arc<L>,
    blocker: Arc<B>,
}

impl<L, B> Clone for Gate<L, B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            limiter: Arc::clone(&self.limiter),
            blocker: Arc::clone(&self.blocker),
        }
    }
}

impl<L: RateLimiterBackend, B: BlockerBackend> Gate<L, B> {
    pub fn new(registry: Arc<GroupRegistry>, limiter: Arc<L>, blocker: Arc<B>) -> Self {
        Self {
            registry,
            limiter,
            blocker,
        }
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Register or replace a group policy.
    ///
    /// # Errors
    /// Returns [`crate::LimitgateError::InvalidPolicy`] for a zero window or
    /// a name that cannot be used as a key segment.
    pub fn register_group(&self, name: &str, max: u32, window: Duration) -> Result<()> {
        validate_group_name(name)?;
        let policy = GroupPolicy::new(max, window)?;
        self.registry.register(name, policy);
        Ok(())
    }

    /// Consume capacity; a negative result means the caller should reject.
    pub async fn admit(&self, key: &str, group: &str, weight: u32) -> Result<i64> {
        self.limiter.admit(key, group, weight).await
    }

    pub async fn block_until(&self, key: &str, cause: &str, expiry: DateTime<Utc>) -> Result<()> {
        self.blocker.block_until(key, cause, expiry).await
    }

    pub async fn block_state(&self, key: &str) -> Result<BlockState> {
        self.blocker.state(key).await
    }

    pub async fn unblock(&self, key: &str) -> Result<()> {
        self.blocker.clean(key).await
    }

    pub async fn clear_limiter(&self, key: &str, group: &str) -> Result<()> {
        self.limiter.clear(key, group).await
    }

    /// Decide on a request: reject blocked keys outright, otherwise admit.
    ///
    /// A blocked key consumes no capacity. Store failures are logged and
    /// returned; whether to fail open or closed is the caller's call.
    #[instrument(level = "debug", skip(self))]
    pub async fn check(&self, key: &str, group: &str, weight: u32) -> Result<Decision> {
        let state = self.blocker.state(key).await.map_err(|e| {
            error!(error = %e, "Check block state failed");
            e
        })?;
        if state.blocked {
            debug!(cause = %state.cause, expiry = %state.expires_at, "Rejecting blocked key");
            return Ok(Decision::Blocked {
                expires_at: state.expires_at,
                cause: state.cause,
            });
        }

        let remaining = self.limiter.admit(key, group, weight).await.map_err(|e| {
            error!(error = %e, "Check rate limit failed");
            e
        })?;

        let decision = Decision::from_remaining(remaining);
        debug!(decision = ?decision, "Admission decision made");
        Ok(decision)
    }
}

impl<S: OrderedSetStore> Gate<SlidingWindowLimiter<S>, CooldownBlocker<S>> {
    /// Build a gate over any store, registering the configured groups.
    ///
    /// # Errors
    /// Fails with [`crate::LimitgateError::Config`] for a zero retention or
    /// timeout, and with [`crate::LimitgateError::InvalidPolicy`] for an
    /// invalid group.
    pub fn with_store(store: Arc<S>, clock: Arc<dyn Clock>, config: &LimitgateConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(GroupRegistry::from_config(&config.groups)?);
        let keys = KeySpace::new(config.store.key_prefix.clone());

        let limiter = Arc::new(SlidingWindowLimiter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&clock),
            keys.clone(),
        ));
        let blocker = Arc::new(CooldownBlocker::new(
            store,
            clock,
            keys,
            config.blocker.max_age(),
        ));

        Ok(Self::new(registry, limiter, blocker))
    }
}

impl RedisGate {
    /// Connect to the configured Redis and build a gate on the system clock.
    ///
    /// # Errors
    /// Fails with [`crate::LimitgateError::Config`] when the store is
    /// unreachable or a configured group is invalid.
    pub async fn connect(config: &LimitgateConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RedisStore::connect(&config.store).await?);
        let gate = Self::with_store(store, Arc::new(SystemClock), config)?;

        info!(
            key_prefix = %config.store.key_prefix,
            groups = gate.registry.len(),
            "Admission gate ready"
        );
        Ok(gate)
    }
}
