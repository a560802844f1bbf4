//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// `level` comes from the settings file (`trace` .. `error`); `RUST_LOG`, when
/// set, takes precedence. Calling this more than once is harmless: later calls
/// leave the first subscriber in place.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rf_daq={level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
