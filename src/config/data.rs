//! Generic configuration container
//!
//! An ordered string-keyed property tree with hierarchical (dotted) keys.
//! The reload machinery treats this as an opaque value store: keys go in
//! during a pass, the result is sealed, and from then on the snapshot is
//! immutable and safe to share across threads behind an `Arc`.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::common::{ConfigError, Result};

use super::diff::ConfigDiff;

/// Separator used for list-valued parameters.
pub const LIST_SEPARATOR: char = ';';

/// Ordered string-keyed configuration map.
///
/// Keys are dotted paths (`org.lockss.config.reloadInterval`). Iteration
/// order is the lexicographic key order, which makes merges and diffs
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    values: BTreeMap<String, String>,
    sealed: bool,
}

impl Configuration {
    /// Create a new, empty, mutable configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty, already-sealed configuration.
    ///
    /// Used as the initial "current configuration" so no caller ever
    /// observes a missing value.
    pub fn empty_sealed() -> Self {
        let mut config = Self::new();
        config.seal();
        config
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// Get a boolean value; accepts `true/false`, `yes/no`, `1/0`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    /// Get an unsigned integer value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.trim().parse().ok()
    }

    /// Get a duration value expressed in milliseconds.
    pub fn get_duration_ms(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_millis)
    }

    /// Get a list-valued parameter (semicolon-separated).
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(value) => value
                .split(LIST_SEPARATOR)
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Set a value. Fails if the configuration has been sealed.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.check_mutable()?;
        self.values.insert(key.into(), value.into());
        Ok(())
    }

    /// Remove a key. Fails if the configuration has been sealed.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.check_mutable()?;
        self.values.remove(key);
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Iterate (key, value) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Extract the subtree under `prefix` (the prefix itself is stripped).
    ///
    /// `prefix` should not carry a trailing dot; `subtree("org.lockss.au")`
    /// maps `org.lockss.au.x.y` to `x.y`.
    pub fn subtree(&self, prefix: &str) -> Configuration {
        let full_prefix = format!("{}.", prefix.trim_end_matches('.'));
        let mut out = Configuration::new();
        for (key, value) in &self.values {
            if let Some(rest) = key.strip_prefix(&full_prefix) {
                if !rest.is_empty() {
                    out.values.insert(rest.to_string(), value.clone());
                }
            }
        }
        out
    }

    /// Copy every key from `other` into this configuration.
    ///
    /// Later sources overwrite earlier ones on key collision, so calling
    /// this repeatedly in load order implements the merge precedence rule.
    pub fn copy_from(&mut self, other: &Configuration) -> Result<()> {
        self.check_mutable()?;
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Seal the configuration; all mutation fails afterwards.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Deep copy that is mutable again regardless of seal state.
    pub fn unsealed_copy(&self) -> Configuration {
        Configuration {
            values: self.values.clone(),
            sealed: false,
        }
    }

    /// Compute the structured difference from `old` to `self`.
    pub fn diff(&self, old: &Configuration) -> ConfigDiff {
        let mut diff = ConfigDiff::default();
        for (key, value) in &self.values {
            match old.values.get(key) {
                None => {
                    diff.added.insert(key.clone());
                }
                Some(old_value) if old_value != value => {
                    diff.changed.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        for key in old.values.keys() {
            if !self.values.contains_key(key) {
                diff.removed.insert(key.clone());
            }
        }
        diff
    }

    /// Value equality ignoring seal state.
    pub fn same_values(&self, other: &Configuration) -> bool {
        self.values == other.values
    }

    fn check_mutable(&self) -> Result<()> {
        if self.sealed {
            debug_assert!(false, "mutation of sealed configuration");
            Err(ConfigError::Other(
                "configuration is sealed".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        let mut c = Configuration::new();
        c.put("org.lockss.config.reloadInterval", "600000").unwrap();
        c.put("org.lockss.platform.project", "CLOCKSS").unwrap();
        c.put("org.lockss.au.plugin1.a", "1").unwrap();
        c.put("org.lockss.au.plugin1.b", "2").unwrap();
        c
    }

    #[test]
    fn test_get_typed() {
        let c = sample();
        assert_eq!(c.get("org.lockss.platform.project"), Some("CLOCKSS"));
        assert_eq!(c.get_u64("org.lockss.config.reloadInterval"), Some(600000));
        assert_eq!(
            c.get_duration_ms("org.lockss.config.reloadInterval"),
            Some(Duration::from_millis(600000))
        );
        assert_eq!(c.get("missing"), None);
    }

    #[test]
    fn test_get_bool() {
        let mut c = Configuration::new();
        c.put("a", "true").unwrap();
        c.put("b", "NO").unwrap();
        c.put("c", "maybe").unwrap();
        assert_eq!(c.get_bool("a"), Some(true));
        assert_eq!(c.get_bool("b"), Some(false));
        assert_eq!(c.get_bool("c"), None);
    }

    #[test]
    fn test_get_list() {
        let mut c = Configuration::new();
        c.put("urls", "aux.xml; titledb.xml ;;extra.xml").unwrap();
        assert_eq!(c.get_list("urls"), vec!["aux.xml", "titledb.xml", "extra.xml"]);
        assert!(c.get_list("missing").is_empty());
    }

    #[test]
    fn test_seal_blocks_mutation() {
        let mut c = sample();
        c.seal();
        assert!(c.is_sealed());
        // debug_assert fires under cfg(test) is avoided by using the
        // release-path check directly
        let res = std::panic::catch_unwind(move || {
            let mut c = c;
            c.put("x", "y")
        });
        // Either a debug assertion panic or an Err is acceptable; the key
        // invariant is that the mutation never silently succeeds.
        match res {
            Ok(inner) => assert!(inner.is_err()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_subtree() {
        let c = sample();
        let au = c.subtree("org.lockss.au.plugin1");
        assert_eq!(au.len(), 2);
        assert_eq!(au.get("a"), Some("1"));
        assert_eq!(au.get("b"), Some("2"));
    }

    #[test]
    fn test_copy_from_last_write_wins() {
        let mut earlier = Configuration::new();
        earlier.put("k", "v1").unwrap();
        earlier.put("only.earlier", "x").unwrap();

        let mut later = Configuration::new();
        later.put("k", "v2").unwrap();

        let mut merged = Configuration::new();
        merged.copy_from(&earlier).unwrap();
        merged.copy_from(&later).unwrap();

        assert_eq!(merged.get("k"), Some("v2"));
        assert_eq!(merged.get("only.earlier"), Some("x"));
    }

    #[test]
    fn test_diff() {
        let old = sample();
        let mut new = old.unsealed_copy();
        new.put("org.lockss.platform.project", "LOCKSS").unwrap();
        new.put("fresh.key", "1").unwrap();
        new.remove("org.lockss.au.plugin1.b").unwrap();

        let diff = new.diff(&old);
        assert!(diff.added.contains("fresh.key"));
        assert!(diff.changed.contains("org.lockss.platform.project"));
        assert!(diff.removed.contains("org.lockss.au.plugin1.b"));
        assert!(!diff.is_empty());

        let noop = old.diff(&old);
        assert!(noop.is_empty());
    }

    #[test]
    fn test_same_values_ignores_seal() {
        let a = sample();
        let mut b = sample();
        b.seal();
        assert!(a.same_values(&b));
        assert_ne!(a, b); // PartialEq includes seal state
    }
}
