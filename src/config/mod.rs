//! Configuration container module
//!
//! The generic ordered property tree consumed by the reload machinery,
//! its parsers, structured diffs, per-source key predicates, and the
//! well-known parameter names the engine itself reads.

pub mod data;
pub mod diff;
pub mod params;
pub mod parser;
pub mod predicate;

pub use data::Configuration;
pub use diff::ConfigDiff;
pub use parser::{parse, ContentKind};
pub use predicate::{KeyPredicate, PredicateFailurePolicy};
