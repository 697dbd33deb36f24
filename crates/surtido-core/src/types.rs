//! # Domain Types
//!
//! Core domain types used throughout Surtido.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Order      │   │    Customer     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  code (business)│   │  order_number   │   │  identification │       │
//! │  │  siigo_id       │   │  status         │   │  siigo_id       │       │
//! │  │  price_cents    │   │  siigo_invoice_*│   │                 │       │
//! │  └─────────────────┘   └────────┬────────┘   └────────┬────────┘       │
//! │                                 │ 1..n                │ 1..1           │
//! │                        ┌────────▼────────┐   ┌────────▼────────┐       │
//! │                        │    OrderItem    │   │ CustomerCredit  │       │
//! │                        │  (snapshots)    │   │ limit / balance │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  SyncLogEntry: one row per SIIGO interaction worth auditing            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every synced entity has:
//! - `id`: UUID v4, used for local relations
//! - `siigo_id`: SIIGO's own GUID, `None` until the entity is linked
//! - a business key (`code`, `identification`, `order_number`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, ValidationError};
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1900 bps = 19% (IVA general), 500 bps = 5% (IVA reducido).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage (for convenience).
    pub fn from_percentage(pct: f64) -> Self {
        TaxRate((pct * 100.0).round() as u32)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product in the distributor's catalog.
///
/// Most products come from SIIGO through the bulk importer; products created
/// locally have `siigo_id = None` until an import links them by `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,

    /// SIIGO product GUID.
    pub siigo_id: Option<String>,

    /// Product code, shared with SIIGO (the business key).
    pub code: String,

    pub name: String,
    pub description: Option<String>,

    /// SIIGO account group name (used as catalog category).
    pub group_name: Option<String>,

    /// Price in minor units, before tax.
    pub price_cents: i64,

    /// Tax rate in basis points (1900 = 19%).
    pub tax_rate_bps: u32,

    /// Whether stock is controlled for this product.
    pub track_inventory: bool,

    /// Current stock level.
    pub current_stock: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    /// Last time this row was refreshed from SIIGO.
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }

    /// Checks whether `quantity` units can be ordered right now.
    ///
    /// Inactive products never can; untracked products always can.
    pub fn can_fulfil(&self, quantity: i64) -> bool {
        if !self.is_active {
            return false;
        }
        !self.track_inventory || self.current_stock >= quantity
    }

    /// Like [`Product::can_fulfil`] but explains why not.
    pub fn ensure_can_fulfil(&self, quantity: i64) -> Result<(), CoreError> {
        if !self.is_active {
            return Err(CoreError::ProductInactive {
                code: self.code.clone(),
            });
        }
        if !self.can_fulfil(quantity) {
            return Err(CoreError::InsufficientStock {
                code: self.code.clone(),
                available: self.current_stock,
                requested: quantity,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Customer & Credit
// =============================================================================

/// A customer (third party in SIIGO terms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub siigo_id: Option<String>,
    /// NIT or cédula, without check digit formatting.
    pub identification: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A customer's credit line.
///
/// ## Credit Workflow
/// ```text
/// New order total: $300.000
///      │
///      ▼
/// check(): limit $1.000.000, balance $800.000 → available $200.000
///      │
///      ▼
/// CreditLimitExceeded { available: 200.000, requested: 300.000 }
/// ```
///
/// A limit of zero means the customer buys cash-only: no credit is tracked
/// against it and [`CustomerCredit::check`] always passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CustomerCredit {
    pub customer_id: String,
    pub credit_limit_cents: i64,
    pub current_balance_cents: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CustomerCredit {
    /// Returns a cash-only credit line for `customer_id`.
    pub fn cash_only(customer_id: impl Into<String>) -> Self {
        CustomerCredit {
            customer_id: customer_id.into(),
            credit_limit_cents: 0,
            current_balance_cents: 0,
            updated_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_cash_only(&self) -> bool {
        self.credit_limit_cents == 0
    }

    /// Remaining credit (may be negative if the limit was lowered).
    #[inline]
    pub fn available(&self) -> Money {
        Money::from_cents(self.credit_limit_cents - self.current_balance_cents)
    }

    /// Checks that `amount` fits in the remaining credit.
    pub fn check(&self, amount: Money) -> Result<(), CoreError> {
        if self.is_cash_only() {
            return Ok(());
        }
        let available = self.available();
        if amount > available {
            return Err(CoreError::CreditLimitExceeded {
                available_cents: available.cents(),
                requested_cents: amount.cents(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// The lifecycle of an order.
///
/// ```text
/// pending ──► confirmed ──► invoiced ──► dispatched ──► delivered
///    │            │             │
///    └────────────┴─────────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Invoiced,
    Dispatched,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Invoiced,
        OrderStatus::Dispatched,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Invoiced => "invoiced",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether an order in this status may move to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Invoiced)
                | (Confirmed, Cancelled)
                | (Invoiced, Dispatched)
                | (Invoiced, Cancelled)
                | (Dispatched, Delivered)
        )
    }

    /// Returns `Ok(next)` when the transition is allowed.
    pub fn transition(&self, next: OrderStatus) -> Result<OrderStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStatusTransition {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: OrderStatus::ALL.iter().map(|s| s.to_string()).collect(),
            })
    }
}

// =============================================================================
// Order
// =============================================================================

/// A customer order, optionally linked to a SIIGO invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// Human-readable number, e.g. `PED-000042`.
    pub order_number: String,
    pub customer_id: String,
    pub status: OrderStatus,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,

    /// SIIGO invoice GUID once invoiced.
    pub siigo_invoice_id: Option<String>,
    /// SIIGO invoice number, e.g. `FV-1-532`.
    pub siigo_invoice_number: Option<String>,
    /// Invoice total as SIIGO reports it (may differ by rounding).
    pub siigo_total_cents: Option<i64>,
    /// Outstanding balance on the SIIGO invoice.
    pub siigo_balance_cents: Option<i64>,
    /// DIAN electronic stamp status reported by SIIGO.
    pub siigo_stamp_status: Option<String>,

    #[ts(as = "Option<String>")]
    pub invoiced_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn is_invoiced(&self) -> bool {
        self.siigo_invoice_id.is_some()
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// A line item in an order.
/// Uses snapshot pattern to freeze product data at time of ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    /// Product code at time of ordering (frozen).
    pub code_snapshot: String,
    /// Product name at time of ordering (frozen).
    pub name_snapshot: String,
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    pub quantity: i64,
    /// Line total before tax (unit_price × quantity).
    pub line_total_cents: i64,
    pub tax_cents: i64,
}

// =============================================================================
// Sync Log
// =============================================================================

/// What kind of SIIGO interaction a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    ProductImport,
    CustomerImport,
    InvoiceUpdate,
    InvoiceCreate,
    StockReconcile,
}

/// Outcome of a logged SIIGO interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogStatus {
    Success,
    Error,
    Skipped,
}

/// A row in `siigo_sync_log`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SyncLogEntry {
    pub id: String,
    /// "product", "customer", "order", or "import" for run summaries.
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub siigo_id: Option<String>,
    pub action: SyncAction,
    pub status: SyncLogStatus,
    pub message: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}
