//! Group policy registry.
//!
//! Maps a traffic class name to its capacity policy. Lookups happen on every
//! admission check and never touch the store.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::config::GroupConfig;
use crate::error::{LimitgateError, Result};
use crate::keys::BLOCKER_SEGMENT;

/// Window applied to unregistered groups.
const FAIL_CLOSED_WINDOW: Duration = Duration::from_secs(1);

/// Capacity policy for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPolicy {
    /// Maximum weighted events allowed per window
    pub max: u32,
    /// Rolling window length
    pub window: Duration,
}

impl GroupPolicy {
    /// Create a policy, rejecting a zero-length window.
    pub fn new(max: u32, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(LimitgateError::InvalidPolicy(
                "window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { max, window })
    }

    /// Policy for groups nobody registered: nothing is admitted.
    pub const fn fail_closed() -> Self {
        Self {
            max: 0,
            window: FAIL_CLOSED_WINDOW,
        }
    }

    /// Window length in milliseconds, saturating.
    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self::fail_closed()
    }
}

/// Check that a group name can be used as a key segment.
pub fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LimitgateError::InvalidPolicy(
            "group name must not be empty".to_string(),
        ));
    }
    if name.contains(':') {
        return Err(LimitgateError::InvalidPolicy(format!(
            "group name '{}' must not contain ':'",
            name
        )));
    }
    if name == BLOCKER_SEGMENT {
        return Err(LimitgateError::InvalidPolicy(format!(
            "group name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

/// In-memory registry of group policies.
///
/// The most recent registration for a name wins. Unknown groups resolve to
/// [`GroupPolicy::fail_closed`].
#[derive(Debug, Default)]
pub struct GroupRegistry {
    policies: RwLock<HashMap<String, GroupPolicy>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured groups, validating each entry.
    pub fn from_config(groups: &[GroupConfig]) -> Result<Self> {
        let registry = Self::new();
        for group in groups {
            validate_group_name(&group.name)?;
            let policy = GroupPolicy::new(group.max, group.window())?;
            registry.register(&group.name, policy);
        }
        Ok(registry)
    }

    /// Register or replace the policy for a group.
    pub fn register(&self, group: &str, policy: GroupPolicy) {
        let previous = self.policies.write().insert(group.to_string(), policy);
        info!(
            group = %group,
            max = policy.max,
            window = ?policy.window,
            replaced = previous.is_some(),
            "Registered group policy"
        );
    }

    /// Remove a group, returning its policy if it was registered.
    pub fn unregister(&self, group: &str) -> Option<GroupPolicy> {
        self.policies.write().remove(group)
    }

    /// Resolve the policy for a group.
    pub fn lookup(&self, group: &str) -> GroupPolicy {
        self.policies
            .read()
            .get(group)
            .copied()
            .unwrap_or_else(GroupPolicy::fail_closed)
    }

    /// Snapshot of every registered group, sorted by name.
    pub fn groups(&self) -> Vec<(String, GroupPolicy)> {
        let mut groups: Vec<_> = self
            .policies
            .read()
            .iter()
            .map(|(name, policy)| (name.clone(), *policy))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
    }

    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }
}
