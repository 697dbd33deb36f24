//! # SIIGO Error Types
//!
//! Error types for everything that crosses the SIIGO boundary.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SIIGO Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Remote API          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  AuthFailed             │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Unauthorized           │ │
//! │  │  ConfigLoad     │  │  Http           │  │  RateLimited  (retry)   │ │
//! │  └─────────────────┘  └─────────────────┘  │  Server       (retry)   │ │
//! │                                            │  Api          (final)   │ │
//! │  ┌─────────────────┐  ┌─────────────────┐  └─────────────────────────┘ │
//! │  │  Local data     │  │  Agent          │                              │
//! │  │                 │  │                 │                              │
//! │  │  Database       │  │  Busy           │                              │
//! │  │  Rule           │  │  ShuttingDown   │                              │
//! │  │  Mapping        │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use surtido_core::CoreError;
use surtido_db::DbError;
use thiserror::Error;

/// Result type alias for SIIGO operations.
pub type SiigoResult<T> = Result<T, SiigoError>;

/// Every way a SIIGO interaction can fail.
#[derive(Debug, Error)]
pub enum SiigoError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid SIIGO configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid SIIGO URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach SIIGO (DNS, refused, reset).
    #[error("Connection to SIIGO failed: {0}")]
    Connection(String),

    /// Request did not complete within the configured timeout.
    #[error("SIIGO request timed out")]
    Timeout,

    /// Any other transport-level failure (body read, redirect loop).
    #[error("HTTP error: {0}")]
    Http(String),

    // =========================================================================
    // Remote API Errors
    // =========================================================================
    /// Credentials were rejected by `/auth`.
    #[error("SIIGO authentication failed: {0}")]
    AuthFailed(String),

    /// A resource call answered 401 even with a fresh token.
    #[error("SIIGO rejected the access token")]
    Unauthorized,

    /// HTTP 429.
    #[error("Rate limited by SIIGO")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx.
    #[error("SIIGO server error {status}: {message}")]
    Server { status: u16, message: String },

    /// HTTP 4xx other than 401/429. Retrying will not help.
    #[error("SIIGO rejected the request ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("Unexpected SIIGO response: {0}")]
    Deserialization(String),

    /// A SIIGO record could not be turned into a local one.
    #[error("Cannot map SIIGO record {siigo_id}: {reason}")]
    Mapping { siigo_id: String, reason: String },

    // =========================================================================
    // Local Errors
    // =========================================================================
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Rule(#[from] CoreError),

    // =========================================================================
    // Agent Errors
    // =========================================================================
    /// The same job is already running (e.g. two imports at once).
    #[error("{0} is already running")]
    Busy(String),

    #[error("SIIGO sync agent is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SiigoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SiigoError::Timeout
        } else if err.is_connect() {
            SiigoError::Connection(err.to_string())
        } else if err.is_decode() {
            SiigoError::Deserialization(err.to_string())
        } else {
            SiigoError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SiigoError {
    fn from(err: serde_json::Error) -> Self {
        SiigoError::Deserialization(err.to_string())
    }
}

impl From<url::ParseError> for SiigoError {
    fn from(err: url::ParseError) -> Self {
        SiigoError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SiigoError {
    fn from(err: std::io::Error) -> Self {
        SiigoError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SiigoError {
    fn from(err: toml::de::Error) -> Self {
        SiigoError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SiigoError {
    /// Returns true if the same request may succeed when sent again.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - HTTP 429 and 5xx
    ///
    /// ## Non-Retryable Errors
    /// - Configuration and credential problems
    /// - 4xx rejections and malformed responses
    /// - Local database or business-rule failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SiigoError::Connection(_)
                | SiigoError::Timeout
                | SiigoError::Http(_)
                | SiigoError::RateLimited { .. }
                | SiigoError::Server { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SiigoError::InvalidConfig(_)
                | SiigoError::InvalidUrl(_)
                | SiigoError::ConfigLoadFailed(_)
                | SiigoError::AuthFailed(_)
        )
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SiigoError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
