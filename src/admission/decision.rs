//! Outcome of a combined admission check.

use chrono::{DateTime, Utc};

/// What a caller should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Within budget.
    Allowed { remaining: i64 },
    /// Over budget; `remaining` is negative.
    Throttled { remaining: i64 },
    /// The key is serving a cooldown. No capacity was consumed.
    Blocked {
        expires_at: DateTime<Utc>,
        cause: String,
    },
}

impl Decision {
    pub fn from_remaining(remaining: i64) -> Self {
        if remaining < 0 {
            Decision::Throttled { remaining }
        } else {
            Decision::Allowed { remaining }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Remaining capacity, suitable for an `X-RateLimit-Remaining` header.
    ///
    /// `None` for blocked keys, whose capacity was not consulted.
    pub fn remaining(&self) -> Option<i64> {
        match self {
            Decision::Allowed { remaining } | Decision::Throttled { remaining } => Some(*remaining),
            Decision::Blocked { .. } => None,
        }
    }
}
