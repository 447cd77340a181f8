//! Logging utility functions

/// Initialize the logging system
///
/// `level` is the default filter applied unless `RUST_LOG` overrides it.
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // Ignore double-init, which happens across test binaries
    let _ = env_logger::Builder::from_env(env).try_init();
}
