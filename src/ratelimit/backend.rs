//! Rate limiter trait for abstracting over backing stores.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// The admission façade only sees this trait, so an in-memory limiter can
/// stand in for the Redis-backed one without touching callers.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Consume `weight` units of `group` capacity for `key`.
    ///
    /// Returns the remaining capacity in the current window. A negative value
    /// means the caller is over budget; rejecting the request is up to the
    /// caller.
    async fn admit(&self, key: &str, group: &str, weight: u32) -> Result<i64>;

    /// Drop all recorded consumption for `key` within `group`.
    async fn clear(&self, key: &str, group: &str) -> Result<()>;
}
