//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};
use crate::errors::{Error, Result};

/// Builds the filter: `RUST_LOG` when set, the configured level otherwise
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::config(format!("logging.level {:?}: {e}", config.level))),
    }
}

/// Installs the global subscriber
///
/// Fails if the level is not a valid filter directive or a subscriber is
/// already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
    };
    installed.map_err(|e| Error::config(format!("failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "routesync=loud".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(env_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_level_directive_accepted() {
        let config = LogConfig {
            level: "routesync=debug,warn".to_string(),
            format: LogFormat::Json,
        };
        assert!(env_filter(&config).is_ok());
    }
}
