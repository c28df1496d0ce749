//! Limitgate - distributed rate limiting and cooldown blocking
//!
//! Many independent processes share a consistent view of how much capacity a
//! key has consumed and whether it is blocked, using nothing but a shared
//! Redis instance. Every multi-step update is a single `MULTI`/`EXEC` batch
//! over sorted sets; there is no peer-to-peer coordination, background task or
//! in-process lock beyond the group registry.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use limitgate::{Decision, LimitgateConfig, RedisGate};
//!
//! # async fn run() -> limitgate::Result<()> {
//! let config = LimitgateConfig::load(Some("limitgate.yaml"))?;
//! let gate = RedisGate::connect(&config).await?;
//! gate.register_group("login", 3, Duration::from_secs(1))?;
//!
//! match gate.check("10.0.0.1", "login", 1).await? {
//!     Decision::Allowed { remaining } => println!("ok, {} left", remaining),
//!     Decision::Throttled { .. } => println!("429"),
//!     Decision::Blocked { cause, .. } => println!("blocked: {}", cause),
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod keys;
pub mod ratelimit;
pub mod store;
pub mod telemetry;

pub use admission::{Decision, Gate, RedisGate};
pub use config::LimitgateConfig;
pub use cooldown::{BlockState, BlockerBackend, CooldownBlocker};
pub use error::{LimitgateError, Result};
pub use ratelimit::{GroupPolicy, GroupRegistry, RateLimiterBackend, SlidingWindowLimiter};
pub use store::{MemoryStore, OrderedSetStore, RedisStore};
