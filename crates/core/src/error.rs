//! Core errors

use thiserror::Error;

/// Errors raised by the pure state machines and input validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition for {entity}: no edge from '{from}' on '{event}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        event: String,
    },

    #[error("Rejection requires at least one reason")]
    RejectionRequiresReason,

    #[error("Conflicting evidence for '{event}' on {entity} already in '{state}'")]
    ConflictingEvidence {
        entity: &'static str,
        state: String,
        event: String,
    },

    #[error("Approval requires at least one clear test result on file")]
    TestsOutstanding,

    #[error("Unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        event: impl Into<String>,
    ) -> Self {
        CoreError::InvalidTransition {
            entity,
            from: from.to_string(),
            event: event.into(),
        }
    }

    /// Whether the caller must refetch state before retrying
    pub fn is_transition_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidTransition { .. }
                | CoreError::ConflictingEvidence { .. }
                | CoreError::TestsOutstanding
        )
    }
}
