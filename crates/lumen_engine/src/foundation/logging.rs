//! Logging utilities
//!
//! The engine reports through the `log` facade; `env_logger` is the sink.

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    init_with_level("info");
}

/// Initialize the logging system with a default filter
///
/// `RUST_LOG` still takes precedence when set. Calling this more than once is
/// harmless; later calls are ignored.
pub fn init_with_level(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    if env_logger::Builder::from_env(env).format_timestamp_millis().try_init().is_err() {
        log::trace!("Logger already initialized");
    }
}
