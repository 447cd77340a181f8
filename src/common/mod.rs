//! Common module
//!
//! Shared error types, cancellation, filesystem helpers and logging setup
//! used throughout the engine.

pub mod cancel;
pub mod error;
pub mod fs;
pub mod log;

// Re-export commonly used types and functions
pub use cancel::CancelFlag;
pub use error::{ConfigError, Result};
pub use log::init_logger;
