// /shop-platform/services/order-service/src/utils/error.rs
// Centralized error handling untuk order service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use event_bus::BusError;
use thiserror::Error;

use crate::models::ErrorResponse;

/// Type alias untuk Result dengan AppError
pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Retries exhausted: {0}")]
    RetryExhausted(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    PreconditionFailed,
    IntegrityViolation,
    Rejected,
    Fatal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Transient(_) | AppError::Database(_) => ErrorKind::Transient,
            AppError::Bus(e) if e.is_transient() => ErrorKind::Transient,
            AppError::PreconditionFailed(_)
            | AppError::InvalidTransition { .. }
            | AppError::NotFound(_) => ErrorKind::PreconditionFailed,
            AppError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            AppError::Decode(_) => ErrorKind::Rejected,
            AppError::RetryExhausted(_)
            | AppError::Configuration(_)
            | AppError::Bus(_)
            | AppError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl IntoResponse for AppError {
    /// Convert AppError ke HTTP response
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Decode(msg) => (StatusCode::BAD_REQUEST, "DECODE_ERROR", msg.clone()),
            AppError::PreconditionFailed(msg) => {
                (StatusCode::CONFLICT, "PRECONDITION_FAILED", msg.clone())
            }
            AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", self.to_string())
            }
            AppError::IntegrityViolation(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Transient(msg) => {
                tracing::warn!("Transient error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "TEMPORARILY_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database operation failed".to_string(),
                )
            }
            AppError::Bus(e) => {
                tracing::error!("Event bus error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "EVENT_BUS_ERROR",
                    "Event bus unavailable".to_string(),
                )
            }
            AppError::RetryExhausted(msg)
            | AppError::Configuration(msg)
            | AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error_code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Transient(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                AppError::IntegrityViolation(db.message().to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

/// Calls to the payment service
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::Decode(err.to_string())
        } else {
            AppError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_is_not_retried_as_transient() {
        let err = AppError::InvalidTransition {
            from: "DELIVERED".into(),
            to: "PROCESSING".into(),
        };
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(err.to_string(), "Invalid transition from DELIVERED to PROCESSING");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_sqlx_mapping() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
