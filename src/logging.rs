//! Tracing subscriber setup for binaries and examples.

use tracing_subscriber::EnvFilter;

/// Initialize a compact console subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info` with noisy
/// storage crates capped at `warn`. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lance=warn,lancedb=warn,sqlx=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
