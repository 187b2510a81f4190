//! Tracing and logging setup shared by fleet services.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, LogFormatError};

/// Initialize process-wide logging for `service`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(service: &'static str) {
    tracing::init(service);
}
