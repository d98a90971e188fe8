//! Tracing initialization for binaries and long-lived test harnesses.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with `EnvFilter` from `RUST_LOG` (default `info`).
///
/// Call once at process start. Subsequent calls are ignored so test binaries
/// can call this freely.
pub fn init() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
