//! Redis-backed ordered-set store.
//!
//! Batches are sent as a single `MULTI`/`EXEC` pipeline, so every process
//! sharing the Redis instance sees either all of a batch or none of it. A
//! dropped or timed-out future can therefore never leave a partial update.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Value};
use tracing::{debug, info, trace};

use super::{Batch, BatchReply, OrderedSetStore, ScoredMember, SetOp};
use crate::config::StoreConfig;
use crate::error::{LimitgateError, Result};

/// Ordered-set store backed by Redis sorted sets.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    operation_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis and verify it answers a liveness probe.
    ///
    /// # Errors
    /// Returns [`LimitgateError::Config`] if a timeout is zero, the URL is invalid, the connection
    /// cannot be established within `connect_timeout`, or the probe fails.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::open(config.url.as_str())
            .map_err(|e| LimitgateError::Config(format!("Invalid store URL: {}", e)))?;

        let connect_timeout = config.connect_timeout();
        let connection = match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(LimitgateError::Config(format!("Failed to connect to store: {}", e)))
            }
            Err(_) => {
                return Err(LimitgateError::Config(format!(
                    "Timed out connecting to store after {:?}",
                    connect_timeout
                )))
            }
        };

        let store = Self::with_connection(connection, config.operation_timeout());
        store
            .ping()
            .await
            .map_err(|e| LimitgateError::Config(format!("Store liveness probe failed: {}", e)))?;

        info!(
            operation_timeout = ?store.operation_timeout,
            "Connected to ordered-set store"
        );
        Ok(store)
    }

    /// Wrap an existing connection manager.
    pub fn with_connection(connection: ConnectionManager, operation_timeout: Duration) -> Self {
        Self {
            connection,
            operation_timeout,
        }
    }

    /// Bound a round-trip by the configured operation timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                debug!(timeout = ?self.operation_timeout, "Store round-trip timed out");
                Err(LimitgateError::Timeout(self.operation_timeout))
            }
        }
    }

    /// Translate a batch into an atomic pipeline.
    fn pipeline(batch: &Batch) -> redis::Pipeline {
        let key = batch.key();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in batch.ops() {
            match op {
                SetOp::RemoveRangeByScore { max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg("-inf").arg(*max).ignore();
                }
                SetOp::Add(members) => {
                    pipe.cmd("ZADD").arg(key);
                    for member in members {
                        pipe.arg(member.score).arg(&member.member);
                    }
                    pipe.ignore();
                }
                SetOp::Expire(ttl) => {
                    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                    pipe.cmd("PEXPIRE").arg(key).arg(millis).ignore();
                }
                SetOp::CountAbove { min } => {
                    pipe.cmd("ZCOUNT").arg(key).arg(format!("({}", min)).arg("+inf");
                }
            }
        }

        pipe
    }
}

/// Decode an `EXEC` reply. Ignored commands are already stripped, so only
/// `ZCOUNT` results remain and the last one wins.
fn batch_reply(value: &Value) -> RedisResult<BatchReply> {
    let counts: Vec<u64> = redis::from_redis_value(value)?;
    Ok(BatchReply {
        count: counts.last().copied(),
    })
}

/// Decode a flat `ZRANGE key -1 -1 WITHSCORES` reply.
fn top_reply(value: &Value) -> RedisResult<Option<ScoredMember>> {
    let entries: Vec<(String, f64)> = redis::from_redis_value(value)?;
    Ok(entries
        .into_iter()
        .next()
        .map(|(member, score)| ScoredMember::new(member, score as i64)))
}

#[async_trait]
impl OrderedSetStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _pong: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    async fn execute(&self, batch: &Batch) -> Result<BatchReply> {
        trace!(key = %batch.key(), ops = batch.ops().len(), "Executing store batch");

        let pipe = Self::pipeline(batch);
        let mut conn = self.connection.clone();
        let value: Value = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(batch_reply(&value)?)
    }

    async fn top(&self, key: &str) -> Result<Option<ScoredMember>> {
        let mut conn = self.connection.clone();
        let value: Value = self
            .bounded(
                redis::cmd("ZRANGE")
                    .arg(key)
                    .arg(-1)
                    .arg(-1)
                    .arg("WITHSCORES")
                    .query_async(&mut conn),
            )
            .await?;
        Ok(top_reply(&value)?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = self.bounded(redis::cmd("DEL").arg(key).query_async(&mut conn)).await?;
        Ok(())
    }
}
