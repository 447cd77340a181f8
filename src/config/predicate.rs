//! Key-acceptance predicates
//!
//! A per-source policy deciding which configuration keys that source is
//! permitted to contribute. Evaluated independently per key and
//! side-effect-free.

use log::warn;
use regex::Regex;

use crate::common::{ConfigError, Result};

use super::data::Configuration;

/// What happens when a key fails the predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateFailurePolicy {
    /// Silently drop the offending key (logged as a warning)
    DropKey,
    /// Reject the whole file, failing the source
    RejectFile,
}

#[derive(Debug, Clone)]
enum Matcher {
    AcceptAll,
    NamespacePrefix(Vec<String>),
    AllowDeny {
        allow: Vec<Regex>,
        deny: Vec<Regex>,
    },
}

/// Pure `key -> accepted?` function plus a failure policy.
#[derive(Debug, Clone)]
pub struct KeyPredicate {
    matcher: Matcher,
    policy: PredicateFailurePolicy,
}

impl KeyPredicate {
    /// Predicate that accepts every key.
    pub fn accept_all() -> Self {
        Self {
            matcher: Matcher::AcceptAll,
            policy: PredicateFailurePolicy::DropKey,
        }
    }

    /// Predicate that only accepts keys under the given dotted prefixes.
    ///
    /// Used to sandbox title-database files to the title namespace.
    pub fn namespace(prefixes: &[&str], policy: PredicateFailurePolicy) -> Self {
        let prefixes = prefixes
            .iter()
            .map(|p| format!("{}.", p.trim_end_matches('.')))
            .collect();
        Self {
            matcher: Matcher::NamespacePrefix(prefixes),
            policy,
        }
    }

    /// Allow/deny regex predicate used for expert override files.
    ///
    /// Policy: allowed if it matches an allow pattern; otherwise denied if
    /// it matches a deny pattern; otherwise allowed. Empty and absent
    /// pattern lists behave identically (default allow). Invalid patterns
    /// are skipped with a warning rather than failing the pass.
    pub fn allow_deny(allow_patterns: &[String], deny_patterns: &[String]) -> Self {
        Self {
            matcher: Matcher::AllowDeny {
                allow: compile_patterns(allow_patterns),
                deny: compile_patterns(deny_patterns),
            },
            policy: PredicateFailurePolicy::DropKey,
        }
    }

    /// Evaluate the predicate for one key.
    pub fn accepts(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::AcceptAll => true,
            Matcher::NamespacePrefix(prefixes) => {
                prefixes.iter().any(|p| key.starts_with(p.as_str()))
            }
            Matcher::AllowDeny { allow, deny } => {
                if allow.iter().any(|re| re.is_match(key)) {
                    return true;
                }
                !deny.iter().any(|re| re.is_match(key))
            }
        }
    }

    pub fn policy(&self) -> PredicateFailurePolicy {
        self.policy
    }

    /// Apply the predicate to a parsed configuration.
    ///
    /// With `DropKey`, offending keys are removed and counted; with
    /// `RejectFile`, the first offending key fails the whole source with
    /// `PolicyRejected`.
    pub fn filter(&self, config: Configuration, url: &str) -> Result<Configuration> {
        if matches!(self.matcher, Matcher::AcceptAll) {
            return Ok(config);
        }

        let mut rejected: Vec<String> = Vec::new();
        for key in config.keys() {
            if !self.accepts(key) {
                rejected.push(key.to_string());
            }
        }

        if rejected.is_empty() {
            return Ok(config);
        }

        match self.policy {
            PredicateFailurePolicy::RejectFile => Err(ConfigError::PolicyRejected(format!(
                "{}: key {:?} not permitted by source policy",
                url, rejected[0]
            ))),
            PredicateFailurePolicy::DropKey => {
                warn!(
                    "{}: dropping {} key(s) rejected by source policy (first: {:?})",
                    url,
                    rejected.len(),
                    rejected[0]
                );
                let mut filtered = config;
                for key in &rejected {
                    filtered.remove(key)?;
                }
                Ok(filtered)
            }
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("ignoring invalid key pattern {:?}: {}", p, e);
                None
            }
        })
        .collect()
}
