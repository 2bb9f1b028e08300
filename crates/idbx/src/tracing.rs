//! Logging utilities with idbx segment prefixes.
//!
//! Provides consistent logging setup across idbx Rust components.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with idbx defaults.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Initialize tracing for tests. Safe to call from every test; only the first
/// call installs a subscriber.
pub fn try_init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_test_writer())
        .try_init();
}

/// idbx segment prefixes for logging.
pub mod prefix {
    /// Request/response dispatch prefix
    pub const DISPATCH: &str = "꩜";
    /// Dispatcher or connection startup prefix
    pub const OPEN: &str = "✿";
    /// Dispatcher or connection shutdown prefix
    pub const CLOSE: &str = "❀";
    /// Cursor prefetch prefix
    pub const PREFETCH: &str = "⇶";
    /// Database operations prefix
    pub const DB: &str = "⊔";
    /// Storage backend prefix
    pub const STORE: &str = "▦";
}
