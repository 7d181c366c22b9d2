//! Configuration for the case engine.
//!
//! Configuration is read from `CASE_ENGINE_*` environment variables.

mod engine;

pub use engine::EngineConfig;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for a host process or test binary.
///
/// A subscriber that is already installed is left in place.
pub fn init_tracing(config: &EngineConfig) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
