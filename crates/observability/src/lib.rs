//! Process-wide tracing setup shared by the helpdesk crates.

/// Initialize process-wide tracing (JSON lines, `RUST_LOG` filter).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize compact tracing captured by the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, formatters).
pub mod tracing;
