//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for the pipeline. The level comes from
//! `core.log_level`; `RUST_LOG` overrides it. Debug builds print pretty
//! terminal output, release builds emit JSON lines for log shipping.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter. Calling this more
/// than once (e.g. from several tests) is harmless; later calls are ignored.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("{},cogtrace_engine={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Initialize telemetry from a loaded configuration
pub fn init_from_config(config: &crate::config::Config) {
    init_telemetry_with_level(&config.core.log_level);
}
