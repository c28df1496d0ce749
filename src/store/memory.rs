//! In-process ordered-set store.
//!
//! Mirrors the Redis semantics the limiter and blocker rely on: members are
//! ordered by `(score, member)`, re-adding a member replaces its score, a set
//! that becomes empty disappears together with its TTL, and expired keys read
//! as absent and are dropped when a read finds them. A sweep of every expired
//! key runs on writes at most once per [`SWEEP_INTERVAL`]. Each batch holds the key's shard lock for its whole duration, so
//! batches on one key are atomic with respect to each other.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use tracing::debug;

use super::{Batch, BatchReply, OrderedSetStore, ScoredMember, SetOp};
use crate::clock::{Clock, SystemClock};
use crate::error::{LimitgateError, Result};

/// Minimum spacing between full sweeps of expired keys.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
    expires_at: Option<DateTime<Utc>>,
}

impl SortedSet {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn insert(&mut self, member: &ScoredMember) {
        if let Some(previous) = self.scores.insert(member.member.clone(), member.score) {
            self.ordered.remove(&(previous, member.member.clone()));
        }
        self.ordered.insert((member.score, member.member.clone()));
    }

    fn remove_range_by_score(&mut self, max: i64) {
        let kept = self.ordered.split_off(&(max.saturating_add(1), String::new()));
        let removed = std::mem::replace(&mut self.ordered, kept);
        for (_, member) in removed {
            self.scores.remove(&member);
        }
    }

    fn count_above(&self, min: i64) -> u64 {
        self.ordered.range((min.saturating_add(1), String::new())..).count() as u64
    }

    fn top(&self) -> Option<ScoredMember> {
        self.ordered
            .iter()
            .next_back()
            .map(|(score, member)| ScoredMember::new(member.clone(), *score))
    }
}

/// Ordered-set store kept in process memory.
///
/// Suitable for tests and single-process deployments. Key expiry follows the
/// injected [`Clock`], which lets tests age state without sleeping.
pub struct MemoryStore {
    sets: DashMap<String, SortedSet>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    last_sweep_ms: AtomicI64,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.sets.len())
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let last_sweep_ms = AtomicI64::new(clock.now().timestamp_millis());
        Self {
            sets: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            last_sweep_ms,
        }
    }

    /// Take the store offline (or back online). While offline every
    /// operation fails with [`LimitgateError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of a set's live members in ascending score order.
    pub fn members(&self, key: &str) -> Vec<ScoredMember> {
        match self.live(key, self.clock.now()) {
            Some(set) => set
                .ordered
                .iter()
                .map(|(score, member)| ScoredMember::new(member.clone(), *score))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Remaining time-to-live of a key, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<chrono::Duration> {
        let now = self.clock.now();
        self.live(key, now)
            .and_then(|set| set.expires_at)
            .map(|at| at - now)
    }

    /// Number of keys currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.sets.retain(|_, set| {
            let expired = set.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        self.last_sweep_ms.store(now.timestamp_millis(), Ordering::Relaxed);
        removed
    }

    /// Look up a key, removing it instead if it has expired.
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<Ref<'_, String, SortedSet>> {
        let set = self.sets.get(key)?;
        if !set.is_expired(now) {
            return Some(set);
        }
        drop(set);
        self.sets.remove_if(key, |_, set| set.is_expired(now));
        None
    }

    /// Sweep expired keys if the last sweep is older than [`SWEEP_INTERVAL`].
    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < SWEEP_INTERVAL.as_millis() as i64 {
            return;
        }
        // Only one writer sweeps per interval.
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed, remaining = self.sets.len(), "Swept expired keys");
            }
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LimitgateError::Unavailable("memory store is offline".to_string()))
        }
    }
}

#[async_trait]
impl OrderedSetStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.ensure_available()
    }

    async fn execute(&self, batch: &Batch) -> Result<BatchReply> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut reply = BatchReply::default();

        if batch.is_read_only() {
            let set = self.live(batch.key(), now);
            for op in batch.ops() {
                if let SetOp::CountAbove { min } = op {
                    reply.count = Some(set.as_ref().map_or(0, |set| set.count_above(*min)));
                }
            }
            return Ok(reply);
        }

        let mut set = self.sets.entry(batch.key().to_string()).or_default();
        if set.is_expired(now) {
            *set = SortedSet::default();
        }

        for op in batch.ops() {
            match op {
                SetOp::RemoveRangeByScore { max } => set.remove_range_by_score(*max),
                SetOp::Add(members) => members.iter().for_each(|member| set.insert(member)),
                SetOp::Expire(ttl) => {
                    if !set.is_empty() {
                        let ttl = chrono::Duration::from_std(*ttl).unwrap_or(chrono::Duration::MAX);
                        set.expires_at = now.checked_add_signed(ttl);
                    }
                }
                SetOp::CountAbove { min } => reply.count = Some(set.count_above(*min)),
            }
        }

        let emptied = set.is_empty();
        drop(set);
        if emptied {
            self.sets.remove_if(batch.key(), |_, set| set.is_empty());
        }
        self.maybe_sweep(now);

        Ok(reply)
    }

    async fn top(&self, key: &str) -> Result<Option<ScoredMember>> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self.live(key, now).and_then(|set| set.top()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.sets.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_prune_add_count() {
        let (store, _clock) = store();
        let seed = Batch::new("k").add(vec![
            ScoredMember::new("a", 10),
            ScoredMember::new("b", 20),
            ScoredMember::new("c", 30),
        ]);
        store.execute(&seed).await.unwrap();

        let batch = Batch::new("k")
            .remove_range_by_score(20)
            .add(vec![ScoredMember::new("d", 40)])
            .count_above(0);
        let reply = store.execute(&batch).await.unwrap();

        assert_eq!(reply.count, Some(2));
        assert_eq!(
            store.members("k"),
            vec![ScoredMember::new("c", 30), ScoredMember::new("d", 40)]
        );
    }

    #[tokio::test]
    async fn test_count_is_exclusive_of_min() {
        let (store, _clock) = store();
        let seed = Batch::new("k").add(vec![ScoredMember::new("a", 10), ScoredMember::new("b", 11)]);
        store.execute(&seed).await.unwrap();

        let reply = store.execute(&Batch::new("k").count_above(10)).await.unwrap();
        assert_eq!(reply.count, Some(1));
    }

    #[tokio::test]
    async fn test_readd_replaces_score() {
        let (store, _clock) = store();
        store
            .execute(&Batch::new("k").add(vec![ScoredMember::new("a", 10)]))
            .await
            .unwrap();
        store
            .execute(&Batch::new("k").add(vec![ScoredMember::new("a", 50)]))
            .await
            .unwrap();

        assert_eq!(store.members("k"), vec![ScoredMember::new("a", 50)]);
    }

    #[tokio::test]
    async fn test_read_only_batch_does_not_create_key() {
        let (store, _clock) = store();
        let reply = store.execute(&Batch::new("missing").count_above(0)).await.unwrap();

        assert_eq!(reply.count, Some(0));
        assert!(store.sets.is_empty());
    }

    #[tokio::test]
    async fn test_key_expires_on_clock() {
        let (store, clock) = store();
        let batch = Batch::new("k")
            .add(vec![ScoredMember::new("a", 1)])
            .expire(Duration::from_secs(5));
        store.execute(&batch).await.unwrap();
        assert_eq!(store.ttl("k"), Some(chrono::Duration::seconds(5)));

        clock.advance(Duration::from_secs(5));
        assert!(store.members("k").is_empty());
        assert_eq!(store.top("k").await.unwrap(), None);
        assert_eq!(store.ttl("k"), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_read_drops_expired_key() {
        let (store, clock) = store();
        let batch = Batch::new("k")
            .add(vec![ScoredMember::new("a", 1)])
            .expire(Duration::from_secs(5));
        store.execute(&batch).await.unwrap();
        assert_eq!(store.len(), 1);

        clock.advance(Duration::from_secs(6));
        let reply = store.execute(&Batch::new("k").count_above(0)).await.unwrap();
        assert_eq!(reply.count, Some(0));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_idle_keys_are_swept_on_write() {
        let (store, clock) = store();
        for i in 0..1000 {
            let batch = Batch::new(format!("idle:{}", i))
                .add(vec![ScoredMember::new("a", 1)])
                .expire(Duration::from_secs(61));
            store.execute(&batch).await.unwrap();
        }
        assert_eq!(store.len(), 1000);

        clock.advance(Duration::from_secs(3600));
        store
            .execute(&Batch::new("fresh").add(vec![ScoredMember::new("a", 1)]).expire(Duration::from_secs(61)))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.members("fresh"), vec![ScoredMember::new("a", 1)]);
    }

    #[tokio::test]
    async fn test_sweep_waits_for_interval() {
        let (store, clock) = store();
        store
            .execute(&Batch::new("short").add(vec![ScoredMember::new("a", 1)]).expire(Duration::from_secs(1)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(2));
        store
            .execute(&Batch::new("other").add(vec![ScoredMember::new("a", 1)]))
            .await
            .unwrap();
        // Expired but not yet swept
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_emptied_set_is_removed() {
        let (store, _clock) = store();
        store
            .execute(&Batch::new("k").add(vec![ScoredMember::new("a", 1)]))
            .await
            .unwrap();
        store
            .execute(&Batch::new("k").remove_range_by_score(1).expire(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(store.sets.is_empty());
    }

    #[tokio::test]
    async fn test_top_and_delete() {
        let (store, _clock) = store();
        store
            .execute(&Batch::new("k").add(vec![ScoredMember::new("low", 1), ScoredMember::new("high", 9)]))
            .await
            .unwrap();

        assert_eq!(store.top("k").await.unwrap(), Some(ScoredMember::new("high", 9)));

        store.delete("k").await.unwrap();
        assert_eq!(store.top("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let (store, _clock) = store();
        store.set_available(false);

        assert_err!(store.ping().await);
        assert!(matches!(
            store.execute(&Batch::new("k").count_above(0)).await,
            Err(LimitgateError::Unavailable(_))
        ));

        store.set_available(true);
        assert_ok!(store.ping().await);
    }
}
