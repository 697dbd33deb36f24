//! # Repository Module
//!
//! ```text
//! REST handler / SIIGO task
//!      │  db.products().upsert_from_siigo(&row)
//!      ▼
//! ProductRepository / CustomerRepository / OrderRepository / SyncLogRepository
//!      │  SQL
//!      ▼
//! SQLite
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog CRUD, search, SIIGO upserts, stock
//! - [`customer::CustomerRepository`] - Customers and credit lines
//! - [`order::OrderRepository`] - Transactional order workflow, invoice links
//! - [`sync_log::SyncLogRepository`] - SIIGO audit log and sync cursors

use serde::Serialize;

pub mod customer;
pub mod order;
pub mod product;
pub mod sync_log;

/// What an upsert from SIIGO did to the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No local row matched; a new one was created.
    Inserted,
    /// A local row matched and at least one field changed.
    Updated,
    /// A local row matched and nothing but `last_synced_at` changed.
    Unchanged,
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("gal"), "%gal%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
