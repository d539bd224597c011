//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use image_lab_core::LabError;
use image_lab_store::StoreError;

use crate::transform::TransformError;
use crate::uploads::UploadError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current paid balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Duplicate event (already recorded).
    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::DuplicateEvent(id) => (
                StatusCode::CONFLICT,
                "duplicate_event",
                format!("Event {id} already processed"),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::DuplicateEvent { event_id } => Self::DuplicateEvent(event_id),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::InvalidInput(msg) => Self::BadRequest(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<LabError> for ApiError {
    fn from(err: LabError) -> Self {
        match err {
            LabError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LabError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Forbidden(_) => Self::Forbidden,
            UploadError::NotFound(path) => Self::NotFound(format!("image not found: {path}")),
            UploadError::InvalidPath(_)
            | UploadError::UnsupportedType(_)
            | UploadError::TooLarge { .. }
            | UploadError::Empty => Self::BadRequest(err.to_string()),
            UploadError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<TransformError> for ApiError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Source(e) => e.into(),
            other => Self::ExternalService(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (
                StoreError::NotFound {
                    entity: "user",
                    id: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                StoreError::InsufficientCredits {
                    balance: 1,
                    required: 2,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                StoreError::DuplicateEvent {
                    event_id: "evt".into(),
                },
                StatusCode::CONFLICT,
            ),
            (StoreError::Conflict("x".into()), StatusCode::CONFLICT),
            (StoreError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                StoreError::Database("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn transition_errors_are_conflicts() {
        let err = LabError::InvalidTransition {
            from: image_lab_core::TransformationStatus::Completed,
            to: image_lab_core::TransformationStatus::Failed,
        };
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));
    }
}
