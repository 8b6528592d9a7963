//! Approval workflow errors

use milkbank_business::{BusinessError, ErrorCategory};
use milkbank_core::{CoreError, DonorStatus};
use milkbank_persistence::PersistenceError;
use thiserror::Error;

use crate::provider::ProviderError;

/// Errors from the approval workflow
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// Expired, cancelled or superseded challenge
    #[error("Stale challenge: {0}")]
    StaleChallenge(String),

    #[error("Wrong code, {remaining} attempt(s) left")]
    WrongCode { remaining: i64 },

    #[error("Signing provider unavailable: {0}")]
    TransientProvider(String),

    #[error("Signing provider refused the request: {0}")]
    ProviderRejected(String),

    #[error("Unknown signing provider: {0}")]
    UnknownProvider(String),

    #[error("Donor {donor_id} is no longer eligible for approval (status '{status}')")]
    DonorIneligible {
        donor_id: String,
        status: DonorStatus,
    },
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

impl From<CoreError> for ApprovalError {
    fn from(err: CoreError) -> Self {
        ApprovalError::Business(err.into())
    }
}

impl From<PersistenceError> for ApprovalError {
    fn from(err: PersistenceError) -> Self {
        ApprovalError::Business(err.into())
    }
}

impl From<sqlx::Error> for ApprovalError {
    fn from(err: sqlx::Error) -> Self {
        ApprovalError::Business(err.into())
    }
}

impl From<ProviderError> for ApprovalError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(message) => ApprovalError::TransientProvider(message),
            ProviderError::Rejected(message) => ApprovalError::ProviderRejected(message),
        }
    }
}

impl ApprovalError {
    pub fn stale(message: impl Into<String>) -> Self {
        Self::StaleChallenge(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ApprovalError::Business(e) => e.category(),
            ApprovalError::StaleChallenge(_) | ApprovalError::DonorIneligible { .. } => {
                ErrorCategory::Conflict
            }
            ApprovalError::WrongCode { .. } | ApprovalError::UnknownProvider(_) => {
                ErrorCategory::Validation
            }
            ApprovalError::TransientProvider(_) => ErrorCategory::Transient,
            ApprovalError::ProviderRejected(_) => ErrorCategory::Domain,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::Business(e) => e.code(),
            ApprovalError::StaleChallenge(_) => "STALE_CHALLENGE",
            ApprovalError::WrongCode { .. } => "WRONG_CODE",
            ApprovalError::TransientProvider(_) => "PROVIDER_UNAVAILABLE",
            ApprovalError::ProviderRejected(_) => "PROVIDER_REJECTED",
            ApprovalError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            ApprovalError::DonorIneligible { .. } => "DONOR_NOT_ELIGIBLE",
        }
    }
}
