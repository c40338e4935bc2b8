//! Shared tracing/logging setup for the engine and its callers.

/// Initialize process-wide observability.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filter, format).
pub mod tracing;
