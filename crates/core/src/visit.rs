//! Donation visit input and record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{CoreError, CoreResult};

/// Largest volume accepted for a single session
pub const MAX_VOLUME_ML: i64 = 2000;

/// Outcome of the pre-donation health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Good,
    Bad,
}

/// What staff report at the end of a donation appointment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationReport {
    pub health_status: HealthStatus,
    pub volume_ml: i64,
    pub container_count: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DonationReport {
    /// `volume_ml > 0` exactly when the donor was healthy
    pub fn validate(&self) -> CoreResult<()> {
        match self.health_status {
            HealthStatus::Bad => {
                if self.volume_ml != 0 || self.container_count != 0 {
                    return Err(CoreError::validation(
                        "volume and containers must be 0 when health status is bad",
                    ));
                }
            }
            HealthStatus::Good => {
                if self.volume_ml <= 0 {
                    return Err(CoreError::validation(
                        "volume must be positive when health status is good",
                    ));
                }
                if self.volume_ml > MAX_VOLUME_ML {
                    return Err(CoreError::validation(format!(
                        "volume {} ml exceeds {} ml",
                        self.volume_ml, MAX_VOLUME_ML
                    )));
                }
                if self.container_count < 1 {
                    return Err(CoreError::validation(
                        "at least one container is required",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Persisted donation visit. Keyed by the appointment it closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationVisit {
    pub id: String,
    pub appointment_id: String,
    pub donor_id: String,
    pub health_status: HealthStatus,
    pub volume_ml: i64,
    pub container_count: i64,
    pub points_awarded: i64,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}
