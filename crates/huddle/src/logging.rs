//! Global `tracing` subscriber setup.

use huddle_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the stderr subscriber: multi-line human output or one JSON object
/// per event. Subsequent calls are no-ops.
pub fn init(settings: &LoggingSettings) {
    let filter = env_filter(&settings.level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only when a global subscriber is already set
    let _ = match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
