//! Tracing subscriber setup shared by every binary.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global subscriber, writing to stderr so tools can keep
/// stdout for their output.
///
/// `RUST_LOG` takes precedence. Otherwise `debug` forces the `debug` level,
/// and the configured level applies.
pub fn init(config: &LoggingConfig, debug: bool) {
    let default_level = if debug { "debug" } else { config.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
