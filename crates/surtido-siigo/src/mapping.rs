//! # SIIGO → Local Mapping
//!
//! Pure functions that turn SIIGO records into repository inputs. No I/O,
//! so every rule here is covered by plain unit tests.
//!
//! ```text
//! SiigoProduct ──map_product──► ProductUpsert
//!   prices[0].price_list[position=1].value ─► price_cents
//!   Σ taxes[type=IVA].percentage          ─► tax_rate_bps
//!   available_quantity | Σ warehouses     ─► current_stock
//!   stock_control                         ─► track_inventory
//!
//! SiigoCustomer ─map_customer─► CustomerUpsert
//! SiigoInvoice + Order ─diff_invoice─► InvoicePatch
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use surtido_core::validation::{
    validate_identification, validate_name, validate_price_cents, validate_product_code,
    validate_tax_rate_bps,
};
use surtido_core::{Money, Order, OrderStatus};
use surtido_db::{CustomerUpsert, InvoiceLink, InvoicePatch, ProductUpsert};

use crate::error::{SiigoError, SiigoResult};
use crate::model::{SiigoCustomer, SiigoInvoice, SiigoProduct};

/// Price list position used as the sale price.
const SALE_PRICE_POSITION: u32 = 1;

/// SIIGO's tax type for value-added tax.
const IVA: &str = "IVA";

// =============================================================================
// Amount Conversion
// =============================================================================

/// Converts a SIIGO amount to minor units, rounding half away from zero.
pub fn decimal_to_cents(value: Decimal) -> Option<i64> {
    (value * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Converts minor units to a SIIGO amount (two decimals).
pub fn cents_to_decimal(money: Money) -> Decimal {
    Decimal::new(money.cents(), 2)
}

/// Converts a percentage (`19`, `19.0`, `5.5`) to basis points.
pub fn percentage_to_bps(value: Decimal) -> Option<u32> {
    (value * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u32()
}

// =============================================================================
// Products
// =============================================================================

/// Sale price: the position-1 entry of the first currency's price list,
/// falling back to the first entry when no entry claims position 1.
pub fn sale_price(product: &SiigoProduct) -> Option<Decimal> {
    let list = &product.prices.first()?.price_list;
    list.iter()
        .find(|entry| entry.position == SALE_PRICE_POSITION)
        .or_else(|| list.first())
        .map(|entry| entry.value)
}

/// Sum of the product's IVA percentages, in basis points.
pub fn iva_bps(product: &SiigoProduct) -> Option<u32> {
    product
        .taxes
        .iter()
        .filter(|tax| {
            tax.tax_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(IVA))
        })
        .filter_map(|tax| tax.percentage)
        .try_fold(0u32, |acc, pct| acc.checked_add(percentage_to_bps(pct)?))
}

/// Units on hand: `available_quantity` when present, otherwise the sum of
/// the warehouse quantities. Fractions are truncated.
pub fn stock_quantity(product: &SiigoProduct) -> Option<i64> {
    let quantity = match product.available_quantity {
        Some(q) => q,
        None => product.warehouses.iter().map(|w| w.quantity).sum(),
    };
    quantity.trunc().to_i64()
}

/// Maps a SIIGO product onto a catalog upsert.
pub fn map_product(product: &SiigoProduct) -> SiigoResult<ProductUpsert> {
    let fail = |reason: String| SiigoError::Mapping {
        siigo_id: product.id.clone(),
        reason,
    };

    let code = product.code.trim().to_string();
    validate_product_code(&code).map_err(|e| fail(e.to_string()))?;

    let name = product.name.trim().to_string();
    validate_name("name", &name).map_err(|e| fail(e.to_string()))?;

    let price_cents = match sale_price(product) {
        Some(price) => decimal_to_cents(price).ok_or_else(|| fail(format!("price {price} out of range")))?,
        None => 0,
    };
    validate_price_cents(price_cents).map_err(|e| fail(e.to_string()))?;

    let tax_rate_bps = iva_bps(product).ok_or_else(|| fail("IVA percentage out of range".into()))?;
    validate_tax_rate_bps(tax_rate_bps).map_err(|e| fail(e.to_string()))?;

    let current_stock =
        stock_quantity(product).ok_or_else(|| fail("stock quantity out of range".into()))?;

    Ok(ProductUpsert {
        siigo_id: product.id.clone(),
        code,
        name,
        description: non_empty(product.description.as_deref()),
        group_name: product
            .account_group
            .as_ref()
            .and_then(|g| non_empty(g.name.as_deref())),
        price_cents,
        tax_rate_bps,
        track_inventory: product.stock_control,
        current_stock,
        is_active: product.active,
    })
}

// =============================================================================
// Customers
// =============================================================================

/// Maps a SIIGO customer onto a local upsert.
///
/// The identification keeps SIIGO's check digit (`900123456-7`). Name is the
/// commercial name when set, otherwise the joined name parts.
pub fn map_customer(customer: &SiigoCustomer) -> SiigoResult<CustomerUpsert> {
    let fail = |reason: String| SiigoError::Mapping {
        siigo_id: customer.id.clone(),
        reason,
    };

    let number = customer.identification.trim();
    let identification = match customer.check_digit.as_deref().map(str::trim) {
        Some(dv) if !dv.is_empty() => format!("{number}-{dv}"),
        _ => number.to_string(),
    };
    validate_identification(&identification).map_err(|e| fail(e.to_string()))?;

    let name = non_empty(customer.commercial_name.as_deref()).unwrap_or_else(|| {
        customer
            .name
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    });
    validate_name("customer name", &name).map_err(|e| fail(e.to_string()))?;

    let email = customer
        .contacts
        .iter()
        .find_map(|c| non_empty(c.email.as_deref()));

    let phone = customer
        .phones
        .iter()
        .chain(customer.contacts.iter().filter_map(|c| c.phone.as_ref()))
        .find_map(|p| non_empty(p.number.as_deref()));

    Ok(CustomerUpsert {
        siigo_id: customer.id.clone(),
        identification,
        name,
        email,
        phone,
        is_active: customer.active,
    })
}

/// Identification as SIIGO expects it on documents (without check digit).
pub fn identification_number(identification: &str) -> &str {
    identification
        .split_once('-')
        .map_or(identification, |(number, _)| number)
        .trim()
}

// =============================================================================
// Invoices
// =============================================================================

fn invoice_number(invoice: &SiigoInvoice) -> Option<String> {
    non_empty(invoice.name.as_deref()).or_else(|| invoice.number.map(|n| n.to_string()))
}

fn amount(invoice: &SiigoInvoice, value: Decimal, what: &str) -> SiigoResult<i64> {
    decimal_to_cents(value).ok_or_else(|| SiigoError::Mapping {
        siigo_id: invoice.id.clone(),
        reason: format!("invoice {what} {value} out of range"),
    })
}

/// What to store on an order right after its invoice was created.
pub fn invoice_link(invoice: &SiigoInvoice) -> SiigoResult<InvoiceLink> {
    let total_cents = amount(invoice, invoice.total, "total")?;
    let balance_cents = match invoice.balance {
        Some(balance) => amount(invoice, balance, "balance")?,
        None => total_cents,
    };

    Ok(InvoiceLink {
        siigo_invoice_id: invoice.id.clone(),
        number: invoice_number(invoice),
        total_cents,
        balance_cents,
        stamp_status: invoice.stamp.as_ref().and_then(|s| s.status.clone()),
    })
}

/// Fields of `invoice` that differ from what `order` has stored.
///
/// `annulled` is only set while the order can still be cancelled. A
/// cancelled order has nothing left to cancel, and a dispatched or
/// delivered one cannot be (see [`annulment_blocked`]).
pub fn diff_invoice(order: &Order, invoice: &SiigoInvoice) -> SiigoResult<InvoicePatch> {
    let mut patch = InvoicePatch::default();

    let number = invoice_number(invoice);
    if number.is_some() && number != order.siigo_invoice_number {
        patch.number = number;
    }

    let total = amount(invoice, invoice.total, "total")?;
    if Some(total) != order.siigo_total_cents {
        patch.total_cents = Some(total);
    }

    if let Some(balance) = invoice.balance {
        let balance = amount(invoice, balance, "balance")?;
        if Some(balance) != order.siigo_balance_cents {
            patch.balance_cents = Some(balance);
        }
    }

    let stamp = invoice.stamp.as_ref().and_then(|s| s.status.clone());
    if stamp.is_some() && stamp != order.siigo_stamp_status {
        patch.stamp_status = stamp;
    }

    patch.annulled = invoice.annulled && order.status.can_transition_to(OrderStatus::Cancelled);

    Ok(patch)
}

/// The invoice was annulled in SIIGO but the order has gone too far to be
/// cancelled here.
pub fn annulment_blocked(order: &Order, invoice: &SiigoInvoice) -> bool {
    invoice.annulled
        && order.status != OrderStatus::Cancelled
        && !order.status.can_transition_to(OrderStatus::Cancelled)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
