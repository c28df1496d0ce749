//! Remote key naming.

/// Reserved segment for block records. A group with this name would share the
/// blocker's key space, so registration rejects it.
pub const BLOCKER_SEGMENT: &str = "blocker";

/// Builds the namespaced store keys used by the limiter and the blocker.
///
/// Keys take the form `<prefix>:<group>:<key>` for consumption records and
/// `<prefix>:blocker:<key>` for block records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the consumption record for `key` within `group`.
    pub fn limiter(&self, group: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, group, key)
    }

    /// Key of the block record for `key`.
    pub fn blocker(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, BLOCKER_SEGMENT, key)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("limiter")
    }
}
