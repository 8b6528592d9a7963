//! Authorization vocabulary - roles, resources, actions and the acting caller
//!
//! The service layer never looks up a "current user". Every permission-checked
//! operation receives an [`Actor`] explicitly.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Caller role
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control, including permission policy
    Admin,
    /// Nurses and physicians: screening, approval, donation recording
    MedicalStaff,
    /// Front desk: registration, booking, check-in, gift redemption
    Staff,
    /// The donor themself
    Donor,
}

/// Protected resource kind
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Donor,
    Appointment,
    DonationVisit,
    RewardPoints,
    Approval,
    Gift,
    /// Bookable staff members / stations
    Resource,
}

/// Operation on a resource
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Approve,
    Reject,
    Cancel,
    Record,
    Redeem,
    Manage,
}

/// The authenticated caller of a service operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Internal actor used by maintenance sweeps
    pub fn system() -> Self {
        Self::new("system", Role::Admin)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.id, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_role_string_forms() {
        assert_eq!(Role::MedicalStaff.to_string(), "medical_staff");
        assert_eq!(Role::from_str("staff").unwrap(), Role::Staff);
        assert!(Role::from_str("nurse").is_err());
    }

    #[test]
    fn test_resource_and_action_parse() {
        assert_eq!(Resource::from_str("donation_visit").unwrap(), Resource::DonationVisit);
        assert_eq!(Action::from_str("redeem").unwrap(), Action::Redeem);
        assert_eq!(Resource::RewardPoints.to_string(), "reward_points");
    }

    #[test]
    fn test_actor_display() {
        let actor = Actor::new("nurse-7", Role::MedicalStaff);
        assert_eq!(actor.to_string(), "nurse-7(medical_staff)");
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Role::MedicalStaff).unwrap();
        assert_eq!(json, "\"medical_staff\"");
    }
}
