//! # Order Math
//!
//! Turns requested products and quantities into priced order lines and
//! totals. The database layer persists what this module computes; it never
//! recomputes prices on its own.
//!
//! ```text
//! [(Product, qty), ...]
//!      │  OrderLine::from_product   (validate qty, check stock, snapshot)
//!      ▼
//! [OrderLine, ...]
//!      │  OrderTotals::compute      (Σ line totals, Σ per-line tax)
//!      ▼
//! OrderTotals { subtotal, tax, total }
//! ```
//!
//! Tax is rounded per line and then summed, which is how SIIGO computes the
//! invoice total too; rounding the subtotal once would drift from the
//! invoice by a few centavos on long orders.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Product, TaxRate};
use crate::validation::validate_quantity;
use crate::MAX_ORDER_LINES;

/// A priced line, ready to be persisted as an `OrderItem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLine {
    pub product_id: String,
    pub code: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    pub quantity: i64,
    pub line_total_cents: i64,
    pub tax_cents: i64,
}

impl OrderLine {
    /// Snapshots `product` at its current price and tax rate.
    ///
    /// Fails if the quantity is out of range, the product is inactive, or a
    /// tracked product does not have enough stock.
    pub fn from_product(product: &Product, quantity: i64) -> CoreResult<Self> {
        validate_quantity(quantity)?;
        product.ensure_can_fulfil(quantity)?;

        let line_total = product.price().multiply_quantity(quantity);
        let tax = line_total.calculate_tax(product.tax_rate());

        Ok(OrderLine {
            product_id: product.id.clone(),
            code: product.code.clone(),
            name: product.name.clone(),
            unit_price_cents: product.price_cents,
            tax_rate_bps: product.tax_rate_bps,
            quantity,
            line_total_cents: line_total.cents(),
            tax_cents: tax.cents(),
        })
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }

    #[inline]
    pub fn tax(&self) -> Money {
        Money::from_cents(self.tax_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

/// Order-level amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl OrderTotals {
    /// Sums line totals and per-line tax.
    pub fn compute(lines: &[OrderLine]) -> CoreResult<Self> {
        if lines.is_empty() {
            return Err(CoreError::EmptyOrder);
        }
        if lines.len() > MAX_ORDER_LINES {
            return Err(CoreError::TooManyLines {
                max: MAX_ORDER_LINES,
            });
        }

        let subtotal: Money = lines.iter().map(OrderLine::line_total).sum();
        let tax: Money = lines.iter().map(OrderLine::tax).sum();

        Ok(OrderTotals {
            subtotal,
            tax,
            total: subtotal + tax,
        })
    }
}

/// Merges repeated product ids into one quantity, keeping first-seen order.
///
/// Clients sometimes send the same product on two lines; the stock check
/// has to see the combined quantity.
pub fn merge_quantities<I, S>(requested: I) -> Vec<(String, i64)>
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut merged: Vec<(String, i64)> = Vec::new();
    for (product_id, qty) in requested {
        let product_id = product_id.into();
        match merged.iter_mut().find(|(id, _)| *id == product_id) {
            Some((_, total)) => *total += qty,
            None => merged.push((product_id, qty)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(code: &str, price_cents: i64, tax_bps: u32, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: format!("id-{code}"),
            siigo_id: None,
            code: code.to_string(),
            name: format!("Product {code}"),
            description: None,
            group_name: None,
            price_cents,
            tax_rate_bps: tax_bps,
            track_inventory: true,
            current_stock: stock,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_line_snapshots_price_and_tax() {
        let p = product("ACE-1L", 1_050, 1900, 10);
        let line = OrderLine::from_product(&p, 3).unwrap();

        assert_eq!(line.unit_price_cents, 1_050);
        assert_eq!(line.line_total_cents, 3_150);
        // 3150 × 19% = 598.5 → 599
        assert_eq!(line.tax_cents, 599);
        assert_eq!(line.code, "ACE-1L");
    }

    #[test]
    fn test_line_rejects_bad_quantity_and_stock() {
        let p = product("ACE-1L", 1_050, 1900, 2);
        assert!(matches!(
            OrderLine::from_product(&p, 0),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            OrderLine::from_product(&p, 3),
            Err(CoreError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn test_totals_sum_per_line_tax() {
        let lines = vec![
            OrderLine::from_product(&product("A", 1_050, 1900, 100), 1).unwrap(),
            OrderLine::from_product(&product("B", 1_050, 1900, 100), 1).unwrap(),
            OrderLine::from_product(&product("C", 20_000, 500, 100), 2).unwrap(),
        ];
        let totals = OrderTotals::compute(&lines).unwrap();

        assert_eq!(totals.subtotal.cents(), 42_100);
        // 200 + 200 + 2000 (per line), not round(2100 × 19%) + 2000 = 2399
        assert_eq!(totals.tax.cents(), 2_400);
        assert_eq!(totals.total.cents(), 44_500);
    }

    #[test]
    fn test_totals_empty_and_too_many() {
        assert!(matches!(OrderTotals::compute(&[]), Err(CoreError::EmptyOrder)));

        let line = OrderLine::from_product(&product("A", 100, 0, 100_000), 1).unwrap();
        let lines = vec![line; MAX_ORDER_LINES + 1];
        assert!(matches!(
            OrderTotals::compute(&lines),
            Err(CoreError::TooManyLines { .. })
        ));
    }

    #[test]
    fn test_merge_quantities() {
        let merged = merge_quantities(vec![("a", 2), ("b", 1), ("a", 3)]);
        assert_eq!(merged, vec![("a".to_string(), 5), ("b".to_string(), 1)]);
    }
}
