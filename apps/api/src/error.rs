//! # API Error Type
//!
//! Unified error type for REST handlers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Handler: Result<Json<T>, ApiError>                                     │
//! │         │                                                               │
//! │         ├── DbError     ─┐                                              │
//! │         ├── CoreError   ─┼──► ApiError { code, message } ──► HTTP status│
//! │         └── SiigoError  ─┘                                              │
//! │                                                                         │
//! │  Body:  { "code": "INSUFFICIENT_STOCK",                                 │
//! │           "message": "Insufficient stock for GAL-500: ..." }            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use surtido_core::{CoreError, ValidationError};
use surtido_db::DbError;
use surtido_siigo::SiigoError;

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Resource not found (404)
    NotFound,

    /// Input validation failed (400)
    ValidationError,

    /// Duplicate key (409)
    Conflict,

    /// Status change not allowed (409)
    InvalidStatusTransition,

    /// Not enough stock for an order line (409)
    InsufficientStock,

    /// Order exceeds the customer's credit (422)
    CreditLimitExceeded,

    /// Other business rule (422)
    BusinessLogic,

    /// SIIGO sync is disabled or misconfigured (503)
    SyncUnavailable,

    /// An import is already running (409)
    SyncBusy,

    /// SIIGO failed or rejected the call (502)
    SiigoError,

    /// Database operation failed (500)
    DatabaseError,

    /// Internal server error (500)
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Conflict
            | ErrorCode::InvalidStatusTransition
            | ErrorCode::InsufficientStock
            | ErrorCode::SyncBusy => StatusCode::CONFLICT,
            ErrorCode::CreditLimitExceeded | ErrorCode::BusinessLogic => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorCode::SyncUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::SiigoError => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        ApiError::new(ErrorCode::NotFound, format!("{resource} not found: {id}"))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::ValidationError, message)
    }

    pub fn sync_unavailable() -> Self {
        ApiError::new(ErrorCode::SyncUnavailable, "SIIGO sync is not enabled")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Converts database errors to API errors.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ApiError::not_found(&entity, &id),
            DbError::UniqueViolation { field, value } => {
                ApiError::new(ErrorCode::Conflict, format!("{field} '{value}' already exists"))
            }
            DbError::ForeignKeyViolation { message } => {
                tracing::warn!("Foreign key violation: {}", message);
                ApiError::validation("Invalid reference")
            }
            DbError::Rule(e) => e.into(),
            DbError::PoolExhausted => {
                ApiError::new(ErrorCode::DatabaseError, "Database pool exhausted")
            }
            other => {
                // Log the actual error but return a generic message
                tracing::error!("Database operation failed: {}", other);
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

/// Converts core errors to API errors.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::ProductNotFound(_) => ErrorCode::NotFound,
            CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CoreError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
            CoreError::CreditLimitExceeded { .. } => ErrorCode::CreditLimitExceeded,
            CoreError::ProductInactive { .. } | CoreError::CustomerInactive { .. } => {
                ErrorCode::BusinessLogic
            }
            CoreError::EmptyOrder | CoreError::TooManyLines { .. } | CoreError::Validation(_) => {
                ErrorCode::ValidationError
            }
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::validation(err.to_string())
    }
}

/// Converts SIIGO integration errors to API errors.
impl From<SiigoError> for ApiError {
    fn from(err: SiigoError) -> Self {
        match err {
            SiigoError::Database(e) => e.into(),
            SiigoError::Rule(e) => e.into(),
            SiigoError::Busy(_) => ApiError::new(ErrorCode::SyncBusy, err.to_string()),
            SiigoError::ShuttingDown | SiigoError::ChannelError(_) => {
                ApiError::new(ErrorCode::SyncUnavailable, err.to_string())
            }
            e if e.is_config_error() => {
                tracing::warn!(error = %e, "SIIGO configuration problem");
                ApiError::new(ErrorCode::SyncUnavailable, e.to_string())
            }
            e => {
                tracing::warn!(error = %e, "SIIGO call failed");
                ApiError::new(ErrorCode::SiigoError, e.to_string())
            }
        }
    }
}
