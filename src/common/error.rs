//! Error handling module
//!
//! This module defines the error taxonomy shared by every configuration
//! source and by the reload machinery.

use thiserror::Error;
use std::io;

/// Configuration engine error type
///
/// The variants mirror how the reload pass reacts to a failure: a
/// `NotFound` on a required source aborts the pass, `TransientIo` triggers
/// failover substitution for remote sources, `PolicyRejected` is fatal or
/// not depending on the source's key predicate policy, and `Interrupted`
/// unwinds the pass without installing anything.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or timeout failure that may succeed on retry
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Content was fetched but could not be parsed
    #[error("malformed content: {0}")]
    Malformed(String),

    /// A key-acceptance predicate rejected the source's content
    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    /// A conditional write was refused by the remote service
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Cooperative cancellation requested mid-pass
    #[error("reload interrupted")]
    Interrupted,

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    /// True if retrying later may succeed without any local change.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConfigError::TransientIo(_))
    }

    /// True if the error is the cooperative-cancellation signal.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ConfigError::Interrupted)
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ConfigError`.
pub type Result<T> = std::result::Result<T, ConfigError>;
