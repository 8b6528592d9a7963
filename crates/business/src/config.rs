//! Service configuration
//!
//! All fields have defaults so a partial JSON document is enough.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{BusinessError, BusinessResult};

/// Slot grid and booking window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub slot_minutes: u32,
    #[serde(with = "hhmm")]
    pub day_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub day_end: NaiveTime,
    pub booking_horizon_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            day_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            day_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            booking_horizon_days: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> BusinessResult<()> {
        if self.slot_minutes == 0 || self.slot_minutes > 240 {
            return Err(BusinessError::validation(
                "slot_minutes must be between 1 and 240",
            ));
        }
        if self.day_start >= self.day_end {
            return Err(BusinessError::validation("day_start must be before day_end"));
        }
        if self.booking_horizon_days < 1 {
            return Err(BusinessError::validation(
                "booking_horizon_days must be positive",
            ));
        }
        Ok(())
    }

    fn slot_length(&self) -> Duration {
        Duration::minutes(i64::from(self.slot_minutes))
    }

    /// Start times of every slot that ends by `day_end` on the same day
    pub fn grid_times(&self) -> Vec<NaiveTime> {
        let slot = self.slot_length();
        let mut times = Vec::new();
        let mut t = self.day_start;
        loop {
            let (end, wrapped_secs) = t.overflowing_add_signed(slot);
            if wrapped_secs != 0 || end > self.day_end {
                break;
            }
            times.push(t);
            t = end;
        }
        times
    }

    /// Whether `time` is a slot start inside opening hours
    pub fn is_on_grid(&self, time: NaiveTime) -> bool {
        self.grid_times().contains(&time)
    }
}

/// Donor lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Pre-approval donors untouched this long are abandoned by the sweep
    pub inactivity_days: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inactivity_days: 90,
        }
    }
}

/// Everything the services read from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub scheduler: SchedulerConfig,
    pub lifecycle: LifecycleConfig,
}

/// `HH:MM` form for opening hours
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid() {
        let config = SchedulerConfig::default();
        let times = config.grid_times();
        assert_eq!(times.len(), 16);
        assert_eq!(times[0], NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(times[15], NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert!(config.is_on_grid(NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
        assert!(!config.is_on_grid(NaiveTime::from_hms_opt(9, 15, 0).unwrap()));
        assert!(!config.is_on_grid(NaiveTime::from_hms_opt(16, 0, 0).unwrap()));
    }

    #[test]
    fn test_grid_stops_at_midnight() {
        let config = SchedulerConfig {
            day_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            day_end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            ..Default::default()
        };
        let times = config.grid_times();
        assert_eq!(
            times,
            vec![
                NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(22, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            ]
        );
        assert!(!config.is_on_grid(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
    }

    #[test]
    fn test_partial_json() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"scheduler": {"slot_minutes": 60, "day_end": "12:00"}}"#)
                .unwrap();
        assert_eq!(config.scheduler.slot_minutes, 60);
        assert_eq!(config.scheduler.grid_times().len(), 4);
        assert_eq!(config.lifecycle.inactivity_days, 90);
    }

    #[test]
    fn test_validate() {
        let config = SchedulerConfig {
            slot_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(SchedulerConfig::default().validate().is_ok());
    }
}
