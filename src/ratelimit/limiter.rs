//! Sliding-window limiter over ordered sets.
//!
//! Each (group, key) owns one ordered set. Every unit of admitted weight is a
//! member scored with its arrival time in milliseconds, so the live member
//! count is the consumed capacity. Members at or before `now - window` are
//! pruned lazily, inside the same atomic batch that records and counts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use super::backend::RateLimiterBackend;
use super::registry::GroupRegistry;
use crate::clock::Clock;
use crate::error::Result;
use crate::keys::KeySpace;
use crate::store::{Batch, OrderedSetStore, ScoredMember};

/// Extra retention on top of the window before an idle record expires.
const RETENTION_GRACE: Duration = Duration::from_secs(60);

/// Weighted sliding-window rate limiter.
///
/// This struct is thread-safe and can be shared across tasks and processes;
/// all cross-process coordination happens inside the store.
pub struct SlidingWindowLimiter<S> {
    store: Arc<S>,
    registry: Arc<GroupRegistry>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
}

impl<S: OrderedSetStore> SlidingWindowLimiter<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<GroupRegistry>,
        clock: Arc<dyn Clock>,
        keys: KeySpace,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            keys,
        }
    }

    /// Get the registry this limiter resolves policies from.
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Admit `weight` units for `key` within `group`.
    ///
    /// A weight of zero only counts the live members and leaves the set as it
    /// is. A weight above the policy maximum is answered without a round-trip.
    pub async fn admit(&self, key: &str, group: &str, weight: u32) -> Result<i64> {
        let policy = self.registry.lookup(group);
        let max = i64::from(policy.max);
        let cost = i64::from(weight);

        if max < cost {
            debug!(
                group = %group,
                key = %key,
                weight = weight,
                max = policy.max,
                "Weight can never fit the group policy"
            );
            return Ok(max - cost);
        }

        let now_ms = self.clock.now().timestamp_millis();
        let cutoff = now_ms.saturating_sub(policy.window_ms());
        let store_key = self.keys.limiter(group, key);

        let batch = if weight == 0 {
            Batch::new(store_key).count_above(cutoff)
        } else {
            let members = (0..weight)
                .map(|_| ScoredMember::new(Uuid::new_v4().to_string(), now_ms))
                .collect();
            Batch::new(store_key)
                .remove_range_by_score(cutoff)
                .add(members)
                .expire(policy.window.saturating_add(RETENTION_GRACE))
                .count_above(cutoff)
        };

        let reply = self.store.execute(&batch).await?;
        let count = i64::try_from(reply.count.unwrap_or(0)).unwrap_or(i64::MAX);
        let remaining = max - count;

        trace!(
            group = %group,
            key = %key,
            weight = weight,
            count = count,
            remaining = remaining,
            "Admission checked"
        );
        if remaining < 0 {
            debug!(
                group = %group,
                key = %key,
                count = count,
                max = policy.max,
                "Rate limit exceeded"
            );
        }

        Ok(remaining)
    }

    /// Delete the consumption record for `key` within `group`.
    pub async fn clear(&self, key: &str, group: &str) -> Result<()> {
        debug!(group = %group, key = %key, "Clearing rate limit record");
        self.store.delete(&self.keys.limiter(group, key)).await
    }
}

#[async_trait]
impl<S: OrderedSetStore> RateLimiterBackend for SlidingWindowLimiter<S> {
    async fn admit(&self, key: &str, group: &str, weight: u32) -> Result<i64> {
        self.admit(key, group, weight).await
    }

    async fn clear(&self, key: &str, group: &str) -> Result<()> {
        self.clear(key, group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LimitgateError;
    use crate::ratelimit::GroupPolicy;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    struct Harness {
        limiter: SlidingWindowLimiter<MemoryStore>,
        store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let registry = Arc::new(GroupRegistry::new());
        let limiter = SlidingWindowLimiter::new(
            store.clone(),
            registry,
            Arc::new(clock.clone()),
            KeySpace::default(),
        );
        Harness {
            limiter,
            store,
            clock,
        }
    }

    fn register(h: &Harness, group: &str, max: u32, window: Duration) {
        h.limiter
            .registry()
            .register(group, GroupPolicy::new(max, window).unwrap());
    }

    #[tokio::test]
    async fn test_login_scenario() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(1));

        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 2);
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 1);
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 0);
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), -1);

        h.clock.advance(Duration::from_millis(1100));
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_group_rejects_without_store() {
        let h = harness();
        h.store.set_available(false);

        // Short-circuits before the (offline) store is consulted
        assert_eq!(h.limiter.admit("u1", "unknown", 1).await.unwrap(), -1);
        assert_eq!(h.limiter.admit("u1", "unknown", 5).await.unwrap(), -5);
    }

    #[tokio::test]
    async fn test_oversize_weight_short_circuits() {
        let h = harness();
        register(&h, "withdraw", 5, Duration::from_secs(60));

        assert_eq!(h.limiter.admit("acct", "withdraw", 8).await.unwrap(), -3);
        assert!(h.store.members("limiter:withdraw:acct").is_empty());
    }

    #[tokio::test]
    async fn test_weighted_admission_adds_distinct_members() {
        let h = harness();
        register(&h, "upload", 10, Duration::from_secs(60));

        assert_eq!(h.limiter.admit("u1", "upload", 4).await.unwrap(), 6);

        let members = h.store.members("limiter:upload:u1");
        assert_eq!(members.len(), 4);
        let now_ms = h.clock.now().timestamp_millis();
        assert!(members.iter().all(|m| m.score == now_ms));
    }

    #[tokio::test]
    async fn test_zero_weight_does_not_mutate() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(1));

        assert_eq!(h.limiter.admit("u1", "login", 0).await.unwrap(), 3);
        assert!(h.store.members("limiter:login:u1").is_empty());

        h.limiter.admit("u1", "login", 2).await.unwrap();
        let before = h.store.members("limiter:login:u1");
        let ttl_before = h.store.ttl("limiter:login:u1");

        h.clock.advance(Duration::from_millis(200));
        assert_eq!(h.limiter.admit("u1", "login", 0).await.unwrap(), 1);
        assert_eq!(h.store.members("limiter:login:u1"), before);
        assert_eq!(
            h.store.ttl("limiter:login:u1"),
            ttl_before.map(|ttl| ttl - chrono::Duration::milliseconds(200))
        );
    }

    #[tokio::test]
    async fn test_zero_weight_ignores_expired_members() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(1));

        h.limiter.admit("u1", "login", 3).await.unwrap();
        h.clock.advance(Duration::from_millis(1001));

        assert_eq!(h.limiter.admit("u1", "login", 0).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(1));

        assert_eq!(h.limiter.admit("u1", "login", 2).await.unwrap(), 1);
        h.clock.advance(Duration::from_millis(600));
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 0);

        // The first two age out, the third is still inside the window
        h.clock.advance(Duration::from_millis(500));
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 1);
        assert_eq!(h.store.members("limiter:login:u1").len(), 2);
    }

    #[tokio::test]
    async fn test_member_on_window_boundary_is_pruned() {
        let h = harness();
        register(&h, "login", 1, Duration::from_secs(1));

        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 0);
        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cumulative_within_max_never_negative() {
        let h = harness();
        register(&h, "api", 10, Duration::from_secs(60));

        for weight in [1, 2, 3, 4] {
            assert!(h.limiter.admit("u1", "api", weight).await.unwrap() >= 0);
        }
        assert_eq!(h.limiter.admit("u1", "api", 1).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_clear_resets_usage() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(60));

        for _ in 0..5 {
            h.limiter.admit("u1", "login", 1).await.unwrap();
        }
        h.limiter.clear("u1", "login").await.unwrap();

        assert_eq!(h.limiter.admit("u1", "login", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_groups_and_keys_are_isolated() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(60));
        register(&h, "search", 3, Duration::from_secs(60));

        h.limiter.admit("u1", "login", 3).await.unwrap();

        assert_eq!(h.limiter.admit("u2", "login", 1).await.unwrap(), 2);
        assert_eq!(h.limiter.admit("u1", "search", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_expires_after_window_plus_grace() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(1));

        h.limiter.admit("u1", "login", 1).await.unwrap();
        assert_eq!(
            h.store.ttl("limiter:login:u1"),
            Some(chrono::Duration::seconds(61))
        );
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let h = harness();
        register(&h, "login", 3, Duration::from_secs(1));
        h.store.set_available(false);

        let result = h.limiter.admit("u1", "login", 1).await;
        assert!(matches!(result, Err(LimitgateError::Unavailable(_))));
        assert!(h.limiter.clear("u1", "login").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_admissions_respect_max() {
        let h = Arc::new(harness());
        register(&h, "burst", 10, Duration::from_secs(60));

        let attempts = (0..25).map(|_| {
            let h = h.clone();
            async move { h.limiter.admit("shared", "burst", 1).await.unwrap() }
        });
        let results = futures::future::join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| **r >= 0).count(), 10);
        let mut sorted = results.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (-15..=9).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_backend_trait_dispatch() {
        let h = harness();
        register(&h, "login", 2, Duration::from_secs(1));

        let backend: &dyn RateLimiterBackend = &h.limiter;
        assert_eq!(backend.admit("u1", "login", 1).await.unwrap(), 1);
        backend.clear("u1", "login").await.unwrap();
        assert_eq!(backend.admit("u1", "login", 2).await.unwrap(), 0);
    }
}
