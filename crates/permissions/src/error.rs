//! Permission errors

use milkbank_core::{Action, Resource};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Permission already registered: {resource}:{action}")]
    Duplicate { resource: Resource, action: Action },

    #[error("Permission not registered: {resource}:{action}")]
    Unregistered { resource: Resource, action: Action },

    #[error("Permission denied: {actor} cannot {action} {resource}")]
    Denied {
        actor: String,
        resource: Resource,
        action: Action,
    },

    #[error("Invalid permission '{0}', expected <resource>:<action>")]
    InvalidPermission(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for permission operations
pub type PermissionResult<T> = Result<T, PermissionError>;

impl PermissionError {
    /// Create a denial for `actor`
    pub fn denied(actor: impl std::fmt::Display, resource: Resource, action: Action) -> Self {
        PermissionError::Denied {
            actor: actor.to_string(),
            resource,
            action,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, PermissionError::Denied { .. })
    }
}
