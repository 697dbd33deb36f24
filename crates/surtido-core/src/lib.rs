//! # surtido-core: Pure Business Logic for Surtido
//!
//! Domain types and rules for the distributor's order workflow. Nothing in
//! this crate touches the database, the network or the file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Surtido Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/api (axum REST)                         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ surtido-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │   order   │  │ validation│  │   │
//! │  │   │  Product  │  │   Money   │  │ OrderLine │  │   rules   │  │   │
//! │  │   │  Order    │  │  TaxRate  │  │  Totals   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌──────────────────────┐  ┌───▼──────────────────────────────────┐    │
//! │  │ surtido-siigo (HTTP) │──│ surtido-db (SQLite repositories)     │    │
//! │  └──────────────────────┘  └──────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Customer, Order, SyncLogEntry, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`order`] - Order lines, totals and credit checks
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use surtido_core::money::Money;
//! use surtido_core::types::TaxRate;
//!
//! // Colombian IVA general rate
//! let price = Money::from_cents(1_000_000); // $10.000,00
//! let tax = price.calculate_tax(TaxRate::from_bps(1900));
//! assert_eq!(tax.cents(), 190_000);
//! ```

pub mod error;
pub mod money;
pub mod order;
pub mod types;
pub mod validation;

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use order::{OrderLine, OrderTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines in a single order.
pub const MAX_ORDER_LINES: usize = 200;

/// Maximum quantity of a single product in one order line.
///
/// ## Business Reason
/// Distributors ship by the unit and by the case; 9999 units covers a full
/// truck of the largest SKU while still catching typos like 100000.
pub const MAX_LINE_QUANTITY: i64 = 9999;
