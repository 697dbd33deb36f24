//! # Validation Module
//!
//! Input validation for data entering through the REST API or arriving from
//! SIIGO.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: axum extractors        ── JSON shape, types                  │
//! │  Layer 2: THIS MODULE            ── business rules                      │
//! │  Layer 3: SQLite                 ── NOT NULL, UNIQUE, FOREIGN KEY       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::MAX_LINE_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a product code.
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, `-`, `_` and `.` (SIIGO codes often use dots)
///
/// ## Example
/// ```rust
/// use surtido_core::validation::validate_product_code;
///
/// assert!(validate_product_code("GAL-500").is_ok());
/// assert!(validate_product_code("7702.001").is_ok());
/// assert!(validate_product_code("").is_err());
/// assert!(validate_product_code("has space").is_err());
/// ```
pub fn validate_product_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 50,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, '-', '_' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Validates a product or customer name (1..=200 characters).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a product name.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    validate_name("name", name)
}

/// Validates and trims a search query (empty is allowed, max 100 chars).
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }

    Ok(query.to_string())
}

/// Validates a Colombian identification number (NIT or cédula).
///
/// ## Rules
/// - 5 to 15 digits
/// - Optionally followed by `-` and a single check digit (`900123456-7`)
///
/// ```rust
/// use surtido_core::validation::validate_identification;
///
/// assert!(validate_identification("900123456-7").is_ok());
/// assert!(validate_identification("1020304050").is_ok());
/// assert!(validate_identification("90012A456").is_err());
/// assert!(validate_identification("900123456-78").is_err());
/// ```
pub fn validate_identification(identification: &str) -> ValidationResult<()> {
    let identification = identification.trim();
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "identification".to_string(),
        reason: reason.to_string(),
    };

    if identification.is_empty() {
        return Err(ValidationError::Required {
            field: "identification".to_string(),
        });
    }

    let (number, check_digit) = match identification.split_once('-') {
        Some((number, dv)) => (number, Some(dv)),
        None => (identification, None),
    };

    if !(5..=15).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("must be 5 to 15 digits"));
    }

    if let Some(dv) = check_digit {
        if dv.len() != 1 || !dv.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("check digit must be a single digit"));
        }
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY (9999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in minor units (zero allowed, negative not).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a credit limit in minor units (zero = cash only).
pub fn validate_credit_limit_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "credit_limit".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string.
///
/// ```rust
/// use surtido_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}
