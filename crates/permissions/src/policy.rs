//! Permission policy document
//!
//! ```json
//! {
//!   "permissions": ["donor:read", "donor:create"],
//!   "grants": { "staff": ["donor:read", "donor:create"] }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use milkbank_core::{Action, Resource, Role};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::error::{PermissionError, PermissionResult};

/// A `(resource, action)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| PermissionError::InvalidPermission(s.to_string()))?;
        let resource = Resource::from_str(resource.trim())
            .map_err(|_| PermissionError::InvalidPermission(s.to_string()))?;
        let action = Action::from_str(action.trim())
            .map_err(|_| PermissionError::InvalidPermission(s.to_string()))?;
        Ok(Self { resource, action })
    }
}

impl TryFrom<String> for Permission {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(p: Permission) -> Self {
        p.to_string()
    }
}

/// Serializable registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub grants: BTreeMap<Role, Vec<Permission>>,
}

impl Policy {
    /// Load a policy from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> PermissionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json_pretty(&self) -> PermissionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Built-in policy
pub fn default_policy() -> Policy {
    use Action::*;
    use Resource as R;

    let p = Permission::new;
    let mut permissions = Vec::new();
    for resource in Resource::iter() {
        for action in Action::iter() {
            permissions.push(p(resource, action));
        }
    }

    let medical = vec![
        p(R::Donor, Read),
        p(R::Donor, Create),
        p(R::Donor, Update),
        p(R::Donor, Approve),
        p(R::Donor, Reject),
        p(R::Approval, Read),
        p(R::Approval, Approve),
        p(R::Approval, Cancel),
        p(R::Appointment, Read),
        p(R::Appointment, Create),
        p(R::Appointment, Update),
        p(R::Appointment, Cancel),
        p(R::Appointment, Manage),
        p(R::DonationVisit, Read),
        p(R::DonationVisit, Record),
        p(R::RewardPoints, Read),
        p(R::Gift, Read),
        p(R::Resource, Read),
    ];

    let staff = vec![
        p(R::Donor, Read),
        p(R::Donor, Create),
        p(R::Appointment, Read),
        p(R::Appointment, Create),
        p(R::Appointment, Update),
        p(R::Appointment, Cancel),
        p(R::DonationVisit, Read),
        p(R::RewardPoints, Read),
        p(R::RewardPoints, Redeem),
        p(R::Gift, Read),
        p(R::Resource, Read),
    ];

    let donor = vec![
        p(R::RewardPoints, Read),
        p(R::Appointment, Read),
        p(R::Appointment, Create),
        p(R::Gift, Read),
    ];

    let mut grants = BTreeMap::new();
    grants.insert(Role::Admin, permissions.clone());
    grants.insert(Role::MedicalStaff, medical);
    grants.insert(Role::Staff, staff);
    grants.insert(Role::Donor, donor);

    Policy {
        permissions,
        grants,
    }
}
