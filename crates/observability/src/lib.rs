//! Tracing/logging setup shared by every process embedding the engine.

/// Initialize process-wide structured logging with the default filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, layers).
pub mod tracing;
