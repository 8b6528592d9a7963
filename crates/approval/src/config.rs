//! Approval workflow configuration

use chrono::Duration;
use milkbank_business::BusinessError;
use serde::{Deserialize, Serialize};

use crate::error::ApprovalResult;

/// Challenge window, verification lease and retry bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds an issued challenge stays answerable
    pub challenge_window_secs: i64,
    /// Seconds a submitted code may stay in verification before the session
    /// is treated as abandoned
    pub verify_lease_secs: i64,
    /// Wrong codes allowed before the session fails
    pub max_attempts: i64,
    /// Automatic retries after a transient provider failure
    pub provider_retries: u32,
    /// Register the in-process mock CA. Its codes are derivable from the
    /// transaction id, so it is for development and tests only.
    pub mock_provider: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            challenge_window_secs: 300,
            verify_lease_secs: 120,
            max_attempts: 5,
            provider_retries: 1,
            mock_provider: false,
        }
    }
}

impl ApprovalConfig {
    pub fn challenge_window(&self) -> Duration {
        Duration::seconds(self.challenge_window_secs)
    }

    pub fn verify_lease(&self) -> Duration {
        Duration::seconds(self.verify_lease_secs)
    }

    pub fn validate(&self) -> ApprovalResult<()> {
        if self.challenge_window_secs <= 0 {
            return Err(BusinessError::validation("challenge_window_secs must be positive").into());
        }
        if self.verify_lease_secs <= 0 {
            return Err(BusinessError::validation("verify_lease_secs must be positive").into());
        }
        if self.max_attempts < 1 {
            return Err(BusinessError::validation("max_attempts must be at least 1").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ApprovalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ApprovalConfig::default());
        assert_eq!(config.challenge_window(), Duration::minutes(5));
        assert_eq!(config.verify_lease(), Duration::minutes(2));
        assert!(!config.mock_provider);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let config = ApprovalConfig {
            verify_lease_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("verify_lease_secs"));

        let config = ApprovalConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
