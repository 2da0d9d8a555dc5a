//! Configuration: per-environment gateway endpoints, reconciliation tuning
//! and logging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::retry::RetryPolicy;
use crate::types::Environment;

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "ROUTESYNC";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Gateway admin endpoint per environment name
    #[serde(default)]
    pub environments: BTreeMap<String, GatewayConfig>,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Admin API endpoint of one environment's gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub admin_url: String,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default = "def_timeout_secs")]
    pub timeout_secs: u64,
}

fn def_timeout_secs() -> u64 {
    30
}

impl GatewayConfig {
    /// Creates a configuration with the default timeout and no token
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            admin_url: admin_url.into(),
            admin_token: None,
            timeout_secs: def_timeout_secs(),
        }
    }
}

/// Reconciliation tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// `retries` field written on gateway services
    #[serde(default = "def_service_retries")]
    pub service_retries: u32,
    /// Attempts per remote call when the gateway is unavailable
    #[serde(default = "def_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base; doubles after every failed attempt
    #[serde(default = "def_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Status returned by a disabled route
    #[serde(default = "def_termination_status")]
    pub termination_status: u16,
    /// Message returned by a disabled route
    #[serde(default = "def_termination_message")]
    pub termination_message: String,
}

fn def_service_retries() -> u32 {
    1
}
fn def_max_attempts() -> u32 {
    3
}
fn def_base_delay_ms() -> u64 {
    200
}
fn def_termination_status() -> u16 {
    503
}
fn def_termination_message() -> String {
    "This route is currently disabled".into()
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            service_retries: def_service_retries(),
            max_attempts: def_max_attempts(),
            base_delay_ms: def_base_delay_ms(),
            termination_status: def_termination_status(),
            termination_message: def_termination_message(),
        }
    }
}

impl ReconcilerConfig {
    /// Retry policy for remote calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "def_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn def_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: def_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Loads a TOML or JSON file, picked by extension, then applies
    /// environment variable overrides and validates
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(Error::config(format!(
                    "unknown config extension: {}",
                    path.display()
                )))
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Applies `ROUTESYNC_<ENV>_ADMIN_URL` and `ROUTESYNC_<ENV>_ADMIN_TOKEN`
    /// overrides to the configured environments
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (name, gateway) in &mut self.environments {
            let key = name.to_ascii_uppercase().replace('-', "_");
            if let Some(url) = lookup(&format!("{ENV_PREFIX}_{key}_ADMIN_URL")) {
                gateway.admin_url = url;
            }
            if let Some(token) = lookup(&format!("{ENV_PREFIX}_{key}_ADMIN_TOKEN")) {
                gateway.admin_token = Some(token);
            }
        }
    }

    /// Validates the configuration for correctness
    pub fn validate(&self) -> Result<()> {
        for (name, gateway) in &self.environments {
            Environment::new(name.clone())?;

            let url = url::Url::parse(&gateway.admin_url).map_err(|e| {
                Error::config(format!("environments.{name}.admin_url: {e}"))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::config(format!(
                    "environments.{name}.admin_url: unsupported scheme {:?}",
                    url.scheme()
                )));
            }
            if gateway.timeout_secs == 0 {
                return Err(Error::config(format!(
                    "environments.{name}.timeout_secs must be positive"
                )));
            }
        }

        if self.reconciler.max_attempts == 0 {
            return Err(Error::config("reconciler.max_attempts must be at least 1"));
        }
        if !(400..=599).contains(&self.reconciler.termination_status) {
            return Err(Error::config(
                "reconciler.termination_status must be within 400..=599",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[logging]
format = "json"

[reconciler]
max_attempts = 5

[environments.development]
admin_url = "http://kong-dev:8001"

[environments.production]
admin_url = "https://kong-prod:8444"
admin_token = "s3cret"
timeout_secs = 10
"#;

    #[test]
    fn test_parse_toml_with_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.environments["development"].timeout_secs, 30);
        assert_eq!(
            config.environments["production"].admin_token.as_deref(),
            Some("s3cret")
        );
        assert_eq!(config.reconciler.max_attempts, 5);
        assert_eq!(config.reconciler.service_retries, 1);
        assert_eq!(config.reconciler.termination_status, 503);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        let vars: HashMap<String, String> = [
            ("ROUTESYNC_DEVELOPMENT_ADMIN_URL", "http://localhost:8001"),
            ("ROUTESYNC_DEVELOPMENT_ADMIN_TOKEN", "dev-token"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_overrides(|key| vars.get(key).cloned());

        let dev = &config.environments["development"];
        assert_eq!(dev.admin_url, "http://localhost:8001");
        assert_eq!(dev.admin_token.as_deref(), Some("dev-token"));
        assert_eq!(
            config.environments["production"].admin_url,
            "https://kong-prod:8444"
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config
            .environments
            .insert("Prod".to_string(), GatewayConfig::new("http://kong:8001"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config
            .environments
            .insert("production".to_string(), GatewayConfig::new("kong:8001"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reconciler.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reconciler.termination_status = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("routesync.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Config::load(&path).unwrap().environments.len(), 2);

        let path = dir.path().join("routesync.json");
        std::fs::write(
            &path,
            r#"{"environments": {"development": {"admin_url": "http://kong:8001"}}}"#,
        )
        .unwrap();
        assert_eq!(Config::load(&path).unwrap().environments.len(), 1);

        let path = dir.path().join("routesync.ini");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
