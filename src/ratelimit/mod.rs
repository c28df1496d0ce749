//! Rate limiting logic and group policies.

mod backend;
mod limiter;
mod registry;

pub use backend::RateLimiterBackend;
pub use limiter::SlidingWindowLimiter;
pub use registry::{validate_group_name, GroupPolicy, GroupRegistry};
