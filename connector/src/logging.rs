//! Logging configuration.
//!
//! Structured `tracing` output with `RUST_LOG`-driven filtering. Default
//! level is INFO; per-module overrides work the usual way, eg/
//! `RUST_LOG=jacana_connector=debug,jacana_integration=warn`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise human-readable logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Initialise JSON logging for aggregators.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init()
}
