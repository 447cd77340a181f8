//! Cooperative cancellation flag
//!
//! A reload pass checks this flag between roots and between work-queue
//! steps so that a shutdown request interrupts promptly rather than only
//! between whole passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{ConfigError, Result};

/// Shared cancellation flag handed to long-running operations.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a new, un-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Interrupted)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConfigError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());

        let clone = flag.clone();
        clone.cancel();

        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(ConfigError::Interrupted)));
    }
}
