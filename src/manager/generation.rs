//! Configuration generations
//!
//! An immutable snapshot of one source captured at the moment it was read,
//! used purely for change detection: two generations for the same URL are
//! "the same" iff their counters are equal.

use std::sync::Arc;

use crate::common::Result;
use crate::config::Configuration;

/// Versioned snapshot of one configuration source.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Source identity (canonical URL)
    pub url: String,
    /// Parsed configuration snapshot
    pub config: Arc<Configuration>,
    /// Source generation counter at capture time
    pub generation: u64,
}

impl Generation {
    pub fn new(url: impl Into<String>, config: Arc<Configuration>, generation: u64) -> Self {
        Self {
            url: url.into(),
            config,
            generation,
        }
    }

    /// Same-source change comparison: equal counters mean unchanged.
    pub fn same_as(&self, other: &Generation) -> bool {
        self.url == other.url && self.generation == other.generation
    }
}

/// Merge generations in collected order; later sources overwrite earlier
/// ones on key collision.
pub fn merge(generations: &[Generation]) -> Result<Configuration> {
    let mut merged = Configuration::new();
    for generation in generations {
        merged.copy_from(&generation.config)?;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(url: &str, pairs: &[(&str, &str)], counter: u64) -> Generation {
        let mut config = Configuration::new();
        for (k, v) in pairs {
            config.put(*k, *v).unwrap();
        }
        Generation::new(url, Arc::new(config), counter)
    }

    #[test]
    fn test_same_as() {
        let a = generation("u", &[("k", "1")], 3);
        let b = generation("u", &[("k", "2")], 3);
        let c = generation("u", &[("k", "1")], 4);
        assert!(a.same_as(&b)); // counter equality, not content
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_merge_precedence() {
        let g1 = generation("first", &[("k", "v1"), ("only.first", "x")], 1);
        let g2 = generation("second", &[("k", "v2")], 1);

        let merged = merge(&[g1, g2]).unwrap();
        assert_eq!(merged.get("k"), Some("v2"));
        assert_eq!(merged.get("only.first"), Some("x"));
    }
}
