//! Request handlers, one module per resource.

pub mod customers;
pub mod health;
pub mod orders;
pub mod products;
pub mod sync;

/// Default and maximum `limit` for list endpoints.
pub(crate) const DEFAULT_LIMIT: u32 = 50;
pub(crate) const MAX_LIMIT: u32 = 500;

pub(crate) fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}
