//! Process-wide tracing setup shared by the binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::TracingConfig;

/// Initialize tracing with the defaults: JSON lines, `RUST_LOG` or `info`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    self::tracing::init(&TracingConfig::default());
}
