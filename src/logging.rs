//! Process-wide `tracing` setup.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Filter comes from `RUST_LOG`,
/// defaulting to `info`. Calling this twice is harmless; the second call is
/// ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
