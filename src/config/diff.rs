//! Structured configuration differences
//!
//! Produced when a reload pass installs a changed configuration; handed to
//! change listeners and logged for observability.

use std::collections::BTreeSet;
use std::fmt;

/// Added/changed/removed key sets between two configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Keys present in the new configuration only
    pub added: BTreeSet<String>,
    /// Keys present in both but with different values
    pub changed: BTreeSet<String>,
    /// Keys present in the old configuration only
    pub removed: BTreeSet<String>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// True if `key` appears in any of the three sets.
    pub fn contains(&self, key: &str) -> bool {
        self.added.contains(key) || self.changed.contains(key) || self.removed.contains(key)
    }

    /// True if any key under `prefix` (dotted) was touched.
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        let dotted = format!("{}.", prefix.trim_end_matches('.'));
        self.added
            .iter()
            .chain(self.changed.iter())
            .chain(self.removed.iter())
            .any(|k| k.starts_with(&dotted) || k == prefix)
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} changed, {} removed",
            self.added.len(),
            self.changed.len(),
            self.removed.len()
        )
    }
}
