//! Helpers for installing a `tracing` subscriber.
//!
//! Statements are logged under the `tx2_orm::sql` target, lifecycle
//! writes under `tx2_orm::mutation`.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with `RUST_LOG`, falling back to `info`
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific fallback level
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// Verbose subscriber for tests; safe to call more than once
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("tx2_orm=debug"))
        .with_test_writer()
        .try_init();
}
