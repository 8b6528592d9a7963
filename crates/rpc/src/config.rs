//! Application configuration
//!
//! A JSON file (every field optional) overlaid with `MILKBANK_*` environment
//! variables.

use std::path::{Path, PathBuf};

use milkbank_approval::ApprovalConfig;
use milkbank_business::ServiceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Permission policy JSON; the built-in policy when unset
    pub policy_file: Option<PathBuf>,
    pub services: ServiceConfig,
    pub approval: ApprovalConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:milkbank.db".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            policy_file: None,
            services: ServiceConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an optional file, then apply the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Overlay `MILKBANK_DATABASE_URL`, `MILKBANK_HOST`, `MILKBANK_PORT`,
    /// `MILKBANK_POLICY` and `MILKBANK_MOCK_PROVIDER` from `lookup`
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        if let Some(url) = lookup("MILKBANK_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(host) = lookup("MILKBANK_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("MILKBANK_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "MILKBANK_PORT",
                value: port,
            })?;
        }
        if let Some(policy) = lookup("MILKBANK_POLICY") {
            self.policy_file = Some(PathBuf::from(policy));
        }
        if let Some(flag) = lookup("MILKBANK_MOCK_PROVIDER") {
            self.approval.mock_provider = match flag.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "MILKBANK_MOCK_PROVIDER",
                        value: flag,
                    })
                }
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.services
            .scheduler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.approval
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 9000, "services": {{"scheduler": {{"slot_minutes": 45}}}}, "approval": {{"max_attempts": 3}}}}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.services.scheduler.slot_minutes, 45);
        assert_eq!(config.approval.max_attempts, 3);
        assert_eq!(config.approval.challenge_window_secs, 300);
        assert_eq!(config.database_url, "sqlite:milkbank.db");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MILKBANK_DATABASE_URL", "sqlite::memory:"),
            ("MILKBANK_PORT", "9100"),
            ("MILKBANK_POLICY", "/etc/milkbank/policy.json"),
            ("MILKBANK_MOCK_PROVIDER", "true"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::default()
            .with_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(
            config.policy_file.as_deref(),
            Some(Path::new("/etc/milkbank/policy.json"))
        );
        assert!(config.approval.mock_provider);

        let err = AppConfig::default()
            .with_env(|key| (key == "MILKBANK_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = AppConfig::default()
            .with_env(|key| (key == "MILKBANK_MOCK_PROVIDER").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "MILKBANK_MOCK_PROVIDER", .. }));
    }

    #[test]
    fn test_invalid_nested_config() {
        let mut config = AppConfig::default();
        config.approval.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
