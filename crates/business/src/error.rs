//! Business layer errors
//!
//! Every service returns a typed [`BusinessError`]. [`ErrorCategory`] is the
//! coarse classification callers use to decide between retry, refetch and a
//! generic failure.

use milkbank_core::{AppointmentType, CoreError, DonorStatus};
use milkbank_permissions::PermissionError;
use milkbank_persistence::PersistenceError;
use serde::Serialize;
use thiserror::Error;

/// How a caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input; nothing was written
    Validation,
    /// Guard or contention failure; refetch and retry
    Conflict,
    /// Domain rule refused the request
    Domain,
    /// External collaborator unavailable
    Transient,
    Denied,
    NotFound,
    Internal,
}

/// Business operation errors
#[derive(Debug, Error)]
pub enum BusinessError {
    // === Validation errors ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Donor {donor_id} in status '{status}' cannot book a {appointment_type} appointment")]
    DonorNotEligible {
        donor_id: String,
        status: DonorStatus,
        appointment_type: AppointmentType,
    },

    // === State machine errors ===
    #[error(transparent)]
    Core(#[from] CoreError),

    // === Contention errors ===
    #[error("Slot already booked: {resource_id} on {date} at {time}")]
    SlotConflict {
        resource_id: String,
        date: String,
        time: String,
    },

    #[error("Donor {donor_id} already holds an open {appointment_type} appointment")]
    DonorConflict {
        donor_id: String,
        appointment_type: AppointmentType,
    },

    #[error("{entity} {id} was modified concurrently")]
    ConcurrentUpdate { entity: &'static str, id: String },

    // === Domain errors ===
    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("Gift out of stock: {0}")]
    OutOfStock(String),

    // === Access errors ===
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // === Internal errors ===
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias for business operations
pub type BusinessResult<T> = Result<T, BusinessError>;

impl From<PermissionError> for BusinessError {
    fn from(err: PermissionError) -> Self {
        if err.is_denied() {
            BusinessError::PermissionDenied(err.to_string())
        } else {
            BusinessError::Validation(err.to_string())
        }
    }
}

impl BusinessError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn concurrent(entity: &'static str, id: impl Into<String>) -> Self {
        Self::ConcurrentUpdate {
            entity,
            id: id.into(),
        }
    }

    /// Log an invariant breach and build the error for it
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "Invariant violated");
        Self::Invariant(message)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BusinessError::Validation(_) | BusinessError::DonorNotEligible { .. } => {
                ErrorCategory::Validation
            }
            BusinessError::Core(core) => match core {
                CoreError::Validation(_)
                | CoreError::RejectionRequiresReason
                | CoreError::UnknownValue { .. } => ErrorCategory::Validation,
                CoreError::InvalidTransition { .. }
                | CoreError::ConflictingEvidence { .. }
                | CoreError::TestsOutstanding => ErrorCategory::Conflict,
            },
            BusinessError::SlotConflict { .. }
            | BusinessError::DonorConflict { .. }
            | BusinessError::ConcurrentUpdate { .. } => ErrorCategory::Conflict,
            BusinessError::InsufficientPoints { .. } | BusinessError::OutOfStock(_) => {
                ErrorCategory::Domain
            }
            BusinessError::PermissionDenied(_) => ErrorCategory::Denied,
            BusinessError::NotFound { .. } => ErrorCategory::NotFound,
            BusinessError::Persistence(PersistenceError::NotFound { .. }) => {
                ErrorCategory::NotFound
            }
            BusinessError::Persistence(PersistenceError::AlreadyExists { .. }) => {
                ErrorCategory::Conflict
            }
            BusinessError::Invariant(_)
            | BusinessError::Persistence(_)
            | BusinessError::Database(_) => ErrorCategory::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BusinessError::Validation(_) => "VALIDATION_ERROR",
            BusinessError::DonorNotEligible { .. } => "DONOR_NOT_ELIGIBLE",
            BusinessError::Core(CoreError::RejectionRequiresReason) => "REJECTION_REQUIRES_REASON",
            BusinessError::Core(CoreError::Validation(_) | CoreError::UnknownValue { .. }) => {
                "VALIDATION_ERROR"
            }
            BusinessError::Core(CoreError::TestsOutstanding) => "TESTS_OUTSTANDING",
            BusinessError::Core(_) => "INVALID_TRANSITION",
            BusinessError::SlotConflict { .. } => "SLOT_CONFLICT",
            BusinessError::DonorConflict { .. } => "DONOR_CONFLICT",
            BusinessError::ConcurrentUpdate { .. } => "CONCURRENT_UPDATE",
            BusinessError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            BusinessError::OutOfStock(_) => "OUT_OF_STOCK",
            BusinessError::PermissionDenied(_) => "PERMISSION_DENIED",
            BusinessError::NotFound { .. } => "NOT_FOUND",
            BusinessError::Persistence(PersistenceError::NotFound { .. }) => "NOT_FOUND",
            BusinessError::Persistence(PersistenceError::AlreadyExists { .. }) => "ALREADY_EXISTS",
            BusinessError::Invariant(_)
            | BusinessError::Persistence(_)
            | BusinessError::Database(_) => "INTERNAL_ERROR",
        }
    }
}
