//! Appointment types and status machine
//!
//! Scheduled → Arrived → Completed, with Failed reachable from Scheduled or
//! Arrived and Cancelled only from Scheduled. Completed, Failed and Cancelled
//! are terminal and release the slot.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::donor::DonorStatus;
use crate::error::{CoreError, CoreResult};

/// Appointment kind
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Screening,
    Donation,
}

impl AppointmentType {
    /// Whether a donor in `status` may book this kind of appointment
    pub fn accepts(&self, status: DonorStatus) -> bool {
        match self {
            AppointmentType::Screening => status.is_pre_approval(),
            AppointmentType::Donation => {
                matches!(status, DonorStatus::Approved | DonorStatus::Active)
            }
        }
    }
}

/// Appointment status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Arrived,
    Completed,
    Failed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Failed | AppointmentStatus::Cancelled
        )
    }
}

/// Fixed failure vocabulary for `mark_failed`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoShow,
    DonorUnwell,
    LateCancellation,
    StaffUnavailable,
    EquipmentFailure,
    Other,
}

impl FailureReason {
    pub fn requires_notes(&self) -> bool {
        matches!(self, FailureReason::Other)
    }
}

/// A bookable slot: one resource at one grid time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub resource_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Slot {
    pub fn new(resource_id: impl Into<String>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            resource_id: resource_id.into(),
            date,
            time,
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Status change requested on an appointment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AppointmentCommand {
    CheckIn,
    Complete,
    Fail {
        reason: FailureReason,
        #[serde(default)]
        notes: Option<String>,
    },
    Cancel,
}

impl AppointmentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AppointmentCommand::CheckIn => "check_in",
            AppointmentCommand::Complete => "complete",
            AppointmentCommand::Fail { .. } => "mark_failed",
            AppointmentCommand::Cancel => "cancel",
        }
    }

    /// Status the command moves to
    pub fn target(&self) -> AppointmentStatus {
        match self {
            AppointmentCommand::CheckIn => AppointmentStatus::Arrived,
            AppointmentCommand::Complete => AppointmentStatus::Completed,
            AppointmentCommand::Fail { .. } => AppointmentStatus::Failed,
            AppointmentCommand::Cancel => AppointmentStatus::Cancelled,
        }
    }

    /// Statuses the command may start from; used as the `WHERE status IN`
    /// guard of the conditional update
    pub fn allowed_from(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentCommand::CheckIn => &[AppointmentStatus::Scheduled],
            AppointmentCommand::Complete => &[AppointmentStatus::Arrived],
            AppointmentCommand::Fail { .. } => {
                &[AppointmentStatus::Scheduled, AppointmentStatus::Arrived]
            }
            AppointmentCommand::Cancel => &[AppointmentStatus::Scheduled],
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if let AppointmentCommand::Fail { reason, notes } = self {
            let has_notes = notes.as_deref().is_some_and(|n| !n.trim().is_empty());
            if reason.requires_notes() && !has_notes {
                return Err(CoreError::validation(
                    "failure reason 'other' requires notes",
                ));
            }
        }
        Ok(())
    }
}

/// A booked appointment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub donor_id: String,
    pub appointment_type: AppointmentType,
    /// Assigned staff member or station
    pub resource_id: String,
    pub slot_date: NaiveDate,
    pub slot_time: NaiveTime,
    pub status: AppointmentStatus,
    pub failure_reason: Option<FailureReason>,
    pub failure_notes: Option<String>,
    pub cancelled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot(&self) -> Slot {
        Slot::new(self.resource_id.clone(), self.slot_date, self.slot_time)
    }

    /// Decide what `command` does to this appointment.
    ///
    /// Returns `Ok(Some(status))` for a real transition, `Ok(None)` when the
    /// outcome is already realized.
    pub fn plan(&self, command: &AppointmentCommand) -> CoreResult<Option<AppointmentStatus>> {
        command.validate()?;

        if self.status == command.target() {
            if let AppointmentCommand::Fail { reason, .. } = command {
                if self.failure_reason != Some(*reason) {
                    return Err(CoreError::ConflictingEvidence {
                        entity: "appointment",
                        state: self.status.to_string(),
                        event: command.name().to_string(),
                    });
                }
            }
            return Ok(None);
        }

        if command.allowed_from().contains(&self.status) {
            Ok(Some(command.target()))
        } else {
            Err(CoreError::invalid_transition(
                "appointment",
                self.status,
                command.name(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    fn appointment(status: AppointmentStatus) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: "APT-000000000001".to_string(),
            donor_id: "DNR-000000000001".to_string(),
            appointment_type: AppointmentType::Donation,
            resource_id: "nurse-a".to_string(),
            slot_date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            slot_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            status,
            failure_reason: None,
            failure_notes: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_check_in_then_complete() {
        let a = appointment(AppointmentStatus::Scheduled);
        assert_eq!(
            a.plan(&AppointmentCommand::CheckIn).unwrap(),
            Some(AppointmentStatus::Arrived)
        );
        assert!(a.plan(&AppointmentCommand::Complete).is_err());

        let a = appointment(AppointmentStatus::Arrived);
        assert_eq!(
            a.plan(&AppointmentCommand::Complete).unwrap(),
            Some(AppointmentStatus::Completed)
        );
    }

    #[test]
    fn test_cancel_not_allowed_once_arrived() {
        let a = appointment(AppointmentStatus::Arrived);
        let err = a.plan(&AppointmentCommand::Cancel).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_realized_outcome_is_noop() {
        let a = appointment(AppointmentStatus::Arrived);
        assert_eq!(a.plan(&AppointmentCommand::CheckIn).unwrap(), None);
        let a = appointment(AppointmentStatus::Cancelled);
        assert_eq!(a.plan(&AppointmentCommand::Cancel).unwrap(), None);
    }

    #[test]
    fn test_terminal_states_accept_nothing_new() {
        let commands = [
            AppointmentCommand::CheckIn,
            AppointmentCommand::Complete,
            AppointmentCommand::Fail {
                reason: FailureReason::NoShow,
                notes: None,
            },
            AppointmentCommand::Cancel,
        ];
        for status in AppointmentStatus::iter().filter(|s| s.is_terminal()) {
            for command in &commands {
                let planned = appointment(status).plan(command);
                assert!(!matches!(planned, Ok(Some(_))), "{} on {}", command.name(), status);
            }
        }
    }

    #[test]
    fn test_other_failure_requires_notes() {
        let a = appointment(AppointmentStatus::Scheduled);
        let cmd = AppointmentCommand::Fail {
            reason: FailureReason::Other,
            notes: Some("  ".to_string()),
        };
        assert!(matches!(a.plan(&cmd), Err(CoreError::Validation(_))));

        let cmd = AppointmentCommand::Fail {
            reason: FailureReason::Other,
            notes: Some("power cut".to_string()),
        };
        assert_eq!(a.plan(&cmd).unwrap(), Some(AppointmentStatus::Failed));
    }

    #[test]
    fn test_eligibility_by_type() {
        assert!(AppointmentType::Screening.accepts(DonorStatus::Pending));
        assert!(!AppointmentType::Screening.accepts(DonorStatus::Active));
        assert!(AppointmentType::Donation.accepts(DonorStatus::Approved));
        assert!(AppointmentType::Donation.accepts(DonorStatus::Active));
        assert!(!AppointmentType::Donation.accepts(DonorStatus::Suspended));
    }

    #[test]
    fn test_failure_reason_parse() {
        assert_eq!(FailureReason::from_str("no_show").unwrap(), FailureReason::NoShow);
        assert!(FailureReason::from_str("bored").is_err());
    }
}
