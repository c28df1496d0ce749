//! Remote ordered-set store abstraction.
//!
//! The limiter and blocker never talk to Redis directly. They describe their
//! multi-step updates as a [`Batch`] of ordered-set operations against a single
//! key, and an [`OrderedSetStore`] executes that batch atomically.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A member of an ordered set together with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: i64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: i64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// A single operation inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOp {
    /// Remove every member with `score <= max`.
    RemoveRangeByScore { max: i64 },
    /// Insert members, replacing the score of any that already exist.
    Add(Vec<ScoredMember>),
    /// Set the key's time-to-live.
    Expire(Duration),
    /// Count members with `score > min`.
    CountAbove { min: i64 },
}

/// An ordered list of operations applied atomically to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    key: String,
    ops: Vec<SetOp>,
}

impl Batch {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ops: Vec::new(),
        }
    }

    pub fn remove_range_by_score(mut self, max: i64) -> Self {
        self.ops.push(SetOp::RemoveRangeByScore { max });
        self
    }

    /// Queue an insert. Empty inserts are dropped since the store rejects them.
    pub fn add(mut self, members: Vec<ScoredMember>) -> Self {
        if !members.is_empty() {
            self.ops.push(SetOp::Add(members));
        }
        self
    }

    pub fn expire(mut self, ttl: Duration) -> Self {
        self.ops.push(SetOp::Expire(ttl));
        self
    }

    pub fn count_above(mut self, min: i64) -> Self {
        self.ops.push(SetOp::CountAbove { min });
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ops(&self) -> &[SetOp] {
        &self.ops
    }

    /// Whether executing this batch can change the stored set.
    pub fn is_read_only(&self) -> bool {
        self.ops
            .iter()
            .all(|op| matches!(op, SetOp::CountAbove { .. }))
    }
}

/// Results of an executed [`Batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReply {
    /// Result of the last `CountAbove` in the batch, if any.
    pub count: Option<u64>,
}

/// Trait for ordered-set store implementations.
///
/// Implementations must apply a [`Batch`] all-or-nothing: concurrent callers,
/// in this process or another, never observe a half-applied batch.
#[async_trait]
pub trait OrderedSetStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Execute a batch atomically.
    async fn execute(&self, batch: &Batch) -> Result<BatchReply>;

    /// Fetch the highest-scored member of a set.
    async fn top(&self, key: &str) -> Result<Option<ScoredMember>>;

    /// Delete a key outright.
    async fn delete(&self, key: &str) -> Result<()>;
}
