//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Filter defaults to `info` and can be overridden via `RUST_LOG`. Safe to
/// call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
