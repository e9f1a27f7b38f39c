use tracing_subscriber::EnvFilter;

use crate::ConfigError;

/// Install a `fmt` subscriber for the embedding process.
///
/// `filter` takes `RUST_LOG` syntax; `None` reads `RUST_LOG` and falls back to
/// `info`. Returns `false` when a global subscriber was already installed.
pub fn init(filter: Option<&str>) -> Result<bool, ConfigError> {
    let filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| ConfigError::invalid(format!("log_filter: {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok())
}
