//! Response envelope and error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use milkbank_approval::ApprovalError;
use milkbank_business::{BusinessError, ErrorCategory};
use serde::Serialize;

/// `{success, data, error, code}` envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>, code: &'static str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code),
        })
    }
}

/// Error answered to HTTP callers
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    fn from_category(category: ErrorCategory, code: &'static str, message: String) -> Self {
        let status = match category {
            ErrorCategory::Validation | ErrorCategory::Domain => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Denied => StatusCode::FORBIDDEN,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match category {
            ErrorCategory::Internal => {
                tracing::error!(code, error = %message, "Request failed");
                "Something went wrong. Please try again later.".to_string()
            }
            ErrorCategory::Transient => {
                tracing::warn!(code, error = %message, "External service unavailable");
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            _ => message,
        };
        Self::new(status, code, message)
    }
}

impl From<BusinessError> for ApiError {
    fn from(err: BusinessError) -> Self {
        Self::from_category(err.category(), err.code(), err.to_string())
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        Self::from_category(err.category(), err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, ApiResponse::error(self.message, self.code)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milkbank_core::CoreError;

    #[test]
    fn test_category_status() {
        let err = ApiError::from(BusinessError::validation("bad date"));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "VALIDATION_ERROR");

        let err = ApiError::from(BusinessError::from(CoreError::invalid_transition(
            "donor",
            "rejected",
            "approve",
        )));
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = ApiError::from(BusinessError::InsufficientPoints {
            required: 10,
            available: 3,
        });
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "INSUFFICIENT_POINTS");
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err = ApiError::from(BusinessError::invariant("ledger sum mismatch for DNR-1"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("DNR-1"));

        let err = ApiError::from(ApprovalError::TransientProvider("tcp reset".to_string()));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.message.contains("tcp"));
    }
}
