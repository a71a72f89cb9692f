// Logging/tracing setup and command-line overrides

use retailiq_config::{LogFormat, RuntimeConfig};
use std::path::Path;

/// Initialize tracing/logging from RuntimeConfig.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Parse log level from config
    let env_filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

/// Apply command-line flags (highest priority) on top of the loaded config
pub fn apply_cli_overrides(
    config: &mut RuntimeConfig,
    warehouse: Option<&Path>,
    log_level: Option<&str>,
) {
    if let Some(root) = warehouse {
        config.warehouse.root = root.to_string_lossy().to_string();
    }
    if let Some(level) = log_level {
        config.logging.level = level.to_string();
    }
}
