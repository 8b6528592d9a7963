//! # Persistence Errors
//!
//! Error types for the persistence layer, wrapping sqlx and serde errors.
//! Constraint violations the services react to are classified here so that
//! no caller has to inspect driver messages.

use thiserror::Error;

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    // === Database errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Record already exists: {entity} with id {id}")]
    AlreadyExists { entity: String, id: String },

    /// Non-terminal appointment already holds the (resource, date, time) key
    #[error("Slot already booked")]
    SlotTaken,

    /// Donor already holds a non-terminal appointment of that type
    #[error("Donor already holds an open appointment of this type")]
    DonorHasOpenAppointment,

    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    // === Conversion errors ===
    #[error("Invalid enum value: {field} = {value}")]
    InvalidEnumValue { field: String, value: String },

    #[error("Invalid {field} value: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Configuration errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for PersistenceError
pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl PersistenceError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: &str, id: &str) -> Self {
        Self::AlreadyExists {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify constraint failures; everything else stays `Database`
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let message = db_err.message().to_string();
            if db_err.is_unique_violation() {
                return Self::UniqueViolation(message);
            }
            if db_err.is_check_violation() {
                return Self::CheckViolation(message);
            }
            if db_err.is_foreign_key_violation() {
                return Self::ForeignKeyViolation(message);
            }
        }
        Self::Database(err)
    }

    /// Map a unique violation on `appointments` onto the index it hit
    pub(crate) fn from_booking(err: sqlx::Error) -> Self {
        match Self::from_sqlx(err) {
            Self::UniqueViolation(message) if message.contains("resource_id") => Self::SlotTaken,
            Self::UniqueViolation(message) if message.contains("donor_id") => {
                Self::DonorHasOpenAppointment
            }
            other => other,
        }
    }
}
