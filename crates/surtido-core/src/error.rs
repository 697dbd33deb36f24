//! # Error Types
//!
//! Domain-specific error types for surtido-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  surtido-core errors (this file)                                       │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  surtido-db    └── DbError     - Database operation failures           │
//! │  surtido-siigo └── SiigoError  - Remote API / sync failures            │
//! │  apps/api      └── ApiError    - What HTTP clients see (JSON)          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → Client       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product exists but was deactivated (locally or in SIIGO).
    #[error("Product {code} is inactive")]
    ProductInactive { code: String },

    /// Customer was deactivated and cannot place new orders.
    #[error("Customer {identification} is inactive")]
    CustomerInactive { identification: String },

    /// Insufficient stock to fulfil an order line.
    ///
    /// ## User Workflow
    /// ```text
    /// New order: 50 × GAL-500
    ///      │
    ///      ▼
    /// Check stock: available=12
    ///      │
    ///      ▼
    /// InsufficientStock { code: "GAL-500", available: 12, requested: 50 }
    /// ```
    #[error("Insufficient stock for {code}: available {available}, requested {requested}")]
    InsufficientStock {
        code: String,
        available: i64,
        requested: i64,
    },

    /// Order cannot move from its current status to the requested one.
    #[error("Order cannot go from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// The order would push the customer's balance over its credit limit.
    #[error("Credit limit exceeded: available {available_cents}, requested {requested_cents}")]
    CreditLimitExceeded {
        available_cents: i64,
        requested_cents: i64,
    },

    /// Order has no lines.
    #[error("Order must have at least one line")]
    EmptyOrder,

    /// Order has more lines than allowed.
    #[error("Order cannot have more than {max} lines")]
    TooManyLines { max: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid NIT).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            code: "GAL-500".to_string(),
            available: 12,
            requested: 50,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for GAL-500: available 12, requested 50"
        );

        let err = CoreError::InvalidStatusTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Pending,
        };
        assert_eq!(err.to_string(), "Order cannot go from delivered to pending");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "code".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: code is required");
    }
}
