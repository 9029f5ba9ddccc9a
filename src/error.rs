//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::event_store::EventStoreError;
use crate::handlers::CommandOutcome;
use crate::projection::ProjectionError;
use crate::replay::ReplayError;
use crate::snapshot::SnapshotError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Optimistic concurrency retries were exhausted
    #[error("Concurrency conflict on {0}")]
    ConcurrencyConflict(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    // Server errors (5xx)
    /// The stored event stream cannot be folded
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Outcome reported to the caller of a command.
    /// `None` for infrastructure failures.
    pub fn outcome(&self) -> Option<CommandOutcome> {
        match self {
            AppError::Validation(_) => Some(CommandOutcome::BadRequest),
            AppError::Domain(DomainError::AccountNotFound(_)) => Some(CommandOutcome::NotFound),
            AppError::Domain(e) if e.is_client_error() => Some(CommandOutcome::BadRequest),
            AppError::Domain(_) => Some(CommandOutcome::Conflict),
            AppError::ConcurrencyConflict(_) | AppError::DuplicateTransaction(_) => {
                Some(CommandOutcome::Conflict)
            }
            AppError::InvariantViolation(_)
            | AppError::Database(_)
            | AppError::Internal(_)
            | AppError::Config(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.outcome() == Some(CommandOutcome::NotFound)
    }
}

impl From<EventStoreError> for AppError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict { aggregate_id, .. } => {
                AppError::ConcurrencyConflict(aggregate_id)
            }
            EventStoreError::DuplicateTransaction(id) => AppError::DuplicateTransaction(id),
            EventStoreError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ReplayError> for AppError {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::InvariantViolation { .. } => AppError::InvariantViolation(e.to_string()),
            ReplayError::Store(e) => e.into(),
            ReplayError::Snapshot(e) => e.into(),
        }
    }
}

impl From<SnapshotError> for AppError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Store(e) => e.into(),
            SnapshotError::Database(e) => AppError::Database(e),
            SnapshotError::Fold { .. } => AppError::InvariantViolation(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(e: ProjectionError) -> Self {
        match e {
            ProjectionError::Store(e) => e.into(),
            ProjectionError::Database(e) => AppError::Database(e),
            ProjectionError::Decode { .. } => AppError::InvariantViolation(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }

            // 409 Conflict
            AppError::ConcurrencyConflict(id) => {
                (StatusCode::CONFLICT, "concurrency_conflict", Some(id.clone()))
            }
            AppError::DuplicateTransaction(id) => {
                (StatusCode::CONFLICT, "duplicate_transaction", Some(id.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::AccountNotFound(id) => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(id.clone()))
                }
                DomainError::AccountAlreadyExists(id) => {
                    (StatusCode::CONFLICT, "account_already_exists", Some(id.clone()))
                }
                DomainError::InsufficientFunds { .. } => {
                    (StatusCode::CONFLICT, "insufficient_funds", Some(domain_err.to_string()))
                }
                DomainError::BalanceNotZero { .. } => {
                    (StatusCode::CONFLICT, "balance_not_zero", Some(domain_err.to_string()))
                }
                DomainError::AccountClosed(id) => {
                    (StatusCode::CONFLICT, "account_closed", Some(id.clone()))
                }
            },

            // 500 Internal Server Error
            AppError::InvariantViolation(msg) => {
                tracing::error!("Invariant violation: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "invariant_violation", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
