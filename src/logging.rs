//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::MetricsConfig;

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over
/// `config.log_filter`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(config: &MetricsConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    let installed = if config.json_logs {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        tracing::debug!(json = config.json_logs, "logging initialized");
    }
    installed
}
