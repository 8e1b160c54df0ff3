//! Tracing and logging setup shared by storefront processes.

/// Initialize process-wide logging: JSON lines, filtered by `RUST_LOG`
/// (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration and installation.
pub mod tracing;

pub use self::tracing::{LogFormat, ObservabilityConfig, init_with};
