// /shop-platform/services/payment-service/src/utils/error.rs
// Centralized error handling untuk payment service

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

/// Application error enum dengan semua possible errors
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

    #[error("Invalid signature: {0}")]
    Signature(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Payment provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderTransient(String),

    #[error("Payment provider protocol error: {0}")]
    ProviderProtocol(String),

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

/// Coarse classification used by workers to decide what happens next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry on the next tick
    Transient,
    /// Not retried, returned to the caller
    PreconditionFailed,
    /// Duplicate write, treated as idempotent success
    IntegrityViolation,
    /// Bad input from outside (signature, body)
    Rejected,
    /// Needs an operator
    Fatal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Transient(_) | AppError::ProviderTransient(_) | AppError::Database(_) => {
                ErrorKind::Transient
            }
            AppError::Bus(e) if e.is_transient() => ErrorKind::Transient,
            AppError::PreconditionFailed(_)
            | AppError::InvalidTransition { .. }
            | AppError::ProviderProtocol(_)
            | AppError::ProviderNotFound(_)
            | AppError::NotFound(_) => ErrorKind::PreconditionFailed,
            AppError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            AppError::Signature(_) | AppError::Decode(_) => ErrorKind::Rejected,
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
            AppError::Signature(msg) => {
                tracing::warn!("Rejected callback signature: {}", msg);
                (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", "Invalid signature".to_string())
            }
            AppError::Decode(msg) => (StatusCode::BAD_REQUEST, "DECODE_ERROR", msg.clone()),
            AppError::PreconditionFailed(msg) => {
                (StatusCode::CONFLICT, "PRECONDITION_FAILED", msg.clone())
            }
            AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", self.to_string())
            }
            AppError::IntegrityViolation(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::ProviderNotFound(msg) => {
                (StatusCode::NOT_FOUND, "PROVIDER_NOT_FOUND", msg.clone())
            }
            AppError::ProviderTransient(msg) | AppError::ProviderProtocol(msg) => {
                tracing::error!("Payment provider error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR",
                    "Payment provider unavailable".to_string(),
                )
            }
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
            details: None,
        });

        (status, body).into_response()
    }
}

// Implement conversions dari common error types
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

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::ProviderProtocol(err.to_string())
        } else {
            AppError::ProviderTransient(err.to_string())
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
    use std::time::Duration;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::ProviderTransient("x".into()).kind(), ErrorKind::Transient);
        assert_eq!(AppError::ProviderProtocol("x".into()).kind(), ErrorKind::PreconditionFailed);
        assert_eq!(AppError::IntegrityViolation("x".into()).kind(), ErrorKind::IntegrityViolation);
        assert_eq!(AppError::Signature("x".into()).kind(), ErrorKind::Rejected);
        assert_eq!(
            AppError::Bus(BusError::Timeout(Duration::from_secs(1))).kind(),
            ErrorKind::Transient
        );
        assert!(AppError::Transient("pool".into()).is_transient());
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::Signature("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::PreconditionFailed("state".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::ProviderNotFound("PAYPAL".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }
}
