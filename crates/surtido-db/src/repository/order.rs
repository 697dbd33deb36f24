//! # Order Repository
//!
//! The order workflow is the one place where several tables must change
//! together, so every state change that touches stock or credit runs in a
//! single SQLite transaction.
//!
//! ## Order Creation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SINGLE TRANSACTION                               │
//! │                                                                         │
//! │  1. load customer + credit line                                        │
//! │  2. load each product, OrderLine::from_product (active? stock?)        │
//! │  3. OrderTotals::compute, CustomerCredit::check                        │
//! │  4. INSERT orders, INSERT order_items                                  │
//! │  5. UPDATE products SET current_stock = current_stock - qty            │
//! │        WHERE ... AND current_stock >= qty   (re-checked at write time) │
//! │  6. customer_credit.current_balance += total                           │
//! │                                                                         │
//! │  COMMIT ← all or nothing                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Credit Balance
//! A customer's `current_balance_cents` is the outstanding amount of its
//! non-cancelled orders. An order's outstanding amount is its total until it
//! is invoiced, then the balance SIIGO reports for the invoice. Every write
//! that changes that figure adjusts the customer balance by the delta.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::product::PRODUCT_COLUMNS;
use crate::error::{DbError, DbResult};
use surtido_core::order::merge_quantities;
use surtido_core::{
    CoreError, CustomerCredit, Order, OrderItem, OrderLine, OrderStatus, OrderTotals, Product,
};

const ORDER_COLUMNS: &str = "id, order_number, customer_id, status, subtotal_cents, tax_cents, \
     total_cents, notes, siigo_invoice_id, siigo_invoice_number, siigo_total_cents, \
     siigo_balance_cents, siigo_stamp_status, invoiced_at, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, code_snapshot, name_snapshot, \
     unit_price_cents, tax_rate_bps, quantity, line_total_cents, tax_cents";

/// Prefix of generated order numbers (`PED-000001`).
pub const ORDER_NUMBER_PREFIX: &str = "PED-";

/// A requested order line.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderItem {
    pub product_id: String,
    pub quantity: i64,
}

/// A requested order.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<NewOrderItem>,
}

/// Order header plus its lines.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Filter for [`OrderRepository::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<String>,
    pub limit: Option<u32>,
}

/// The SIIGO invoice created for an order.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceLink {
    pub siigo_invoice_id: String,
    pub number: Option<String>,
    pub total_cents: i64,
    pub balance_cents: i64,
    pub stamp_status: Option<String>,
}

/// Changes observed on a SIIGO invoice since it was last stored.
///
/// `None` fields are unchanged. An annulled invoice cancels its order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoicePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp_status: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub annulled: bool,
}

impl InvoicePatch {
    pub fn is_empty(&self) -> bool {
        self.number.is_none()
            && self.total_cents.is_none()
            && self.balance_cents.is_none()
            && self.stamp_status.is_none()
            && !self.annulled
    }
}

/// Amount of the order still owed by the customer.
fn outstanding(order: &Order) -> i64 {
    order.siigo_balance_cents.unwrap_or(order.total_cents)
}

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    pub async fn get_items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY rowid");
        let items = sqlx::query_as::<_, OrderItem>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    pub async fn get_with_items(&self, id: &str) -> DbResult<Option<OrderWithItems>> {
        let Some(order) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let items = self.get_items(id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    /// Lists orders, newest first.
    pub async fn list(&self, filter: &OrderFilter) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR customer_id = ?2)
             ORDER BY created_at DESC, order_number DESC
             LIMIT ?3"
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(filter.status)
            .bind(&filter.customer_id)
            .bind(filter.limit.unwrap_or(50).min(500))
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    pub async fn get_by_siigo_invoice_id(&self, siigo_invoice_id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE siigo_invoice_id = ?1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(siigo_invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Returns the number the next created order will get.
    pub async fn next_order_number(&self) -> DbResult<String> {
        let mut conn = self.pool.acquire().await?;
        next_number(&mut conn).await
    }

    // =========================================================================
    // Workflow
    // =========================================================================

    /// Creates an order with its items, reserving stock and credit.
    pub async fn create(&self, new: &NewOrder) -> DbResult<OrderWithItems> {
        let requested = merge_quantities(
            new.items
                .iter()
                .map(|item| (item.product_id.as_str(), item.quantity)),
        );

        let mut tx = begin_write(&self.pool).await?;

        let customer: Option<(String, bool)> =
            sqlx::query_as("SELECT identification, is_active FROM customers WHERE id = ?1")
                .bind(&new.customer_id)
                .fetch_optional(&mut *tx)
                .await?;
        match customer {
            None => return Err(DbError::not_found("Customer", &new.customer_id)),
            Some((identification, false)) => {
                return Err(CoreError::CustomerInactive { identification }.into())
            }
            Some(_) => {}
        }

        let mut lines = Vec::with_capacity(requested.len());
        for (product_id, quantity) in &requested {
            let product = fetch_product(&mut tx, product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(product_id.clone()))?;
            lines.push(OrderLine::from_product(&product, *quantity)?);
        }
        let totals = OrderTotals::compute(&lines)?;

        let credit = fetch_credit(&mut tx, &new.customer_id).await?;
        credit.check(totals.total)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            order_number: next_number(&mut tx).await?,
            customer_id: new.customer_id.clone(),
            status: OrderStatus::Pending,
            subtotal_cents: totals.subtotal.cents(),
            tax_cents: totals.tax.cents(),
            total_cents: totals.total.cents(),
            notes: new.notes.clone(),
            siigo_invoice_id: None,
            siigo_invoice_number: None,
            siigo_total_cents: None,
            siigo_balance_cents: None,
            siigo_stamp_status: None,
            invoiced_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_id, status,
                subtotal_cents, tax_cents, total_cents, notes,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.customer_id)
        .bind(order.status)
        .bind(order.subtotal_cents)
        .bind(order.tax_cents)
        .bind(order.total_cents)
        .bind(&order.notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                product_id: line.product_id.clone(),
                code_snapshot: line.code.clone(),
                name_snapshot: line.name.clone(),
                unit_price_cents: line.unit_price_cents,
                tax_rate_bps: line.tax_rate_bps,
                quantity: line.quantity,
                line_total_cents: line.line_total_cents,
                tax_cents: line.tax_cents,
            };
            insert_item(&mut tx, &item).await?;
            reserve_stock(&mut tx, line).await?;
            items.push(item);
        }

        adjust_balance(&mut tx, &order.customer_id, order.total_cents, now).await?;

        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            lines = items.len(),
            total_cents = order.total_cents,
            "Order created"
        );
        Ok(OrderWithItems { order, items })
    }

    /// Moves an order to `next`. Cancelling goes through [`Self::cancel`].
    pub async fn update_status(&self, id: &str, next: OrderStatus) -> DbResult<Order> {
        if next == OrderStatus::Cancelled {
            return self.cancel(id).await;
        }

        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))?;
        order.status.transition(next)?;

        let now = Utc::now();
        write_status(&mut tx, &order, next, now).await?;
        tx.commit().await?;

        debug!(order_number = %order.order_number, from = %order.status, to = %next, "Order status changed");
        Ok(Order {
            status: next,
            updated_at: now,
            ..order
        })
    }

    /// Cancels an order, returning its stock and releasing its credit.
    pub async fn cancel(&self, id: &str) -> DbResult<Order> {
        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))?;

        let cancelled = cancel_in_tx(&mut tx, order).await?;
        tx.commit().await?;

        info!(order_number = %cancelled.order_number, "Order cancelled");
        Ok(cancelled)
    }

    /// Links a confirmed order to its new SIIGO invoice and moves it to
    /// `invoiced`.
    pub async fn mark_invoiced(&self, id: &str, link: &InvoiceLink) -> DbResult<Order> {
        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))?;

        if order.is_invoiced() {
            return Err(CoreError::InvalidStatusTransition {
                from: order.status,
                to: OrderStatus::Invoiced,
            }
            .into());
        }
        order.status.transition(OrderStatus::Invoiced)?;

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE orders SET
                status = ?2,
                siigo_invoice_id = ?3, siigo_invoice_number = ?4,
                siigo_total_cents = ?5, siigo_balance_cents = ?6,
                siigo_stamp_status = ?7, invoiced_at = ?8, updated_at = ?8,
                invoice_claimed_at = NULL
            WHERE id = ?1 AND status = ?9
            "#,
        )
        .bind(id)
        .bind(OrderStatus::Invoiced)
        .bind(&link.siigo_invoice_id)
        .bind(&link.number)
        .bind(link.total_cents)
        .bind(link.balance_cents)
        .bind(&link.stamp_status)
        .bind(now)
        .bind(order.status)
        .execute(&mut *tx)
        .await?;

        adjust_balance(
            &mut tx,
            &order.customer_id,
            link.balance_cents - outstanding(&order),
            now,
        )
        .await?;

        let invoiced = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))?;
        tx.commit().await?;

        info!(
            order_number = %invoiced.order_number,
            invoice = ?invoiced.siigo_invoice_number,
            "Order invoiced"
        );
        Ok(invoiced)
    }

    /// Marks a confirmed, not yet invoiced order as having an invoice in
    /// flight. Returns false if the order is not in that state or another
    /// caller already holds the claim.
    ///
    /// The claim is cleared by [`Self::mark_invoiced`] or
    /// [`Self::release_invoice_claim`]. A claim left behind by a crash stays
    /// until released by hand, since SIIGO may already have the invoice.
    pub async fn claim_for_invoicing(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET invoice_claimed_at = ?2
            WHERE id = ?1 AND status = ?3
              AND siigo_invoice_id IS NULL AND invoice_claimed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(Utc::now().timestamp())
        .bind(OrderStatus::Confirmed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_invoice_claim(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE orders SET invoice_claimed_at = NULL WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Applies changes observed on the order's SIIGO invoice.
    pub async fn apply_invoice_patch(&self, id: &str, patch: &InvoicePatch) -> DbResult<Order> {
        let mut tx = begin_write(&self.pool).await?;
        let mut order = fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))?;

        let now = Utc::now();
        let before = outstanding(&order);

        if let Some(number) = &patch.number {
            order.siigo_invoice_number = Some(number.clone());
        }
        if let Some(total) = patch.total_cents {
            order.siigo_total_cents = Some(total);
        }
        if let Some(balance) = patch.balance_cents {
            order.siigo_balance_cents = Some(balance);
        }
        if let Some(stamp) = &patch.stamp_status {
            order.siigo_stamp_status = Some(stamp.clone());
        }
        order.updated_at = now;

        sqlx::query(
            r#"
            UPDATE orders SET
                siigo_invoice_number = ?2, siigo_total_cents = ?3,
                siigo_balance_cents = ?4, siigo_stamp_status = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&order.siigo_invoice_number)
        .bind(order.siigo_total_cents)
        .bind(order.siigo_balance_cents)
        .bind(&order.siigo_stamp_status)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if order.status != OrderStatus::Cancelled {
            adjust_balance(&mut tx, &order.customer_id, outstanding(&order) - before, now).await?;
        }

        let order = if patch.annulled && order.status.can_transition_to(OrderStatus::Cancelled) {
            cancel_in_tx(&mut tx, order).await?
        } else {
            order
        };

        tx.commit().await?;
        Ok(order)
    }
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

/// Opens a transaction that takes the write lock up front.
///
/// Every order write reads before it writes. Under WAL a deferred
/// transaction that read an older snapshot fails with `SQLITE_BUSY` when it
/// tries to write; `IMMEDIATE` waits for the lock (up to the busy timeout)
/// before reading instead.
async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

async fn fetch_product(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
    let product = sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(product)
}

async fn fetch_credit(conn: &mut SqliteConnection, customer_id: &str) -> DbResult<CustomerCredit> {
    let credit = sqlx::query_as::<_, CustomerCredit>(
        "SELECT customer_id, credit_limit_cents, current_balance_cents, updated_at
         FROM customer_credit WHERE customer_id = ?1",
    )
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(credit.unwrap_or_else(|| CustomerCredit::cash_only(customer_id)))
}

async fn next_number(conn: &mut SqliteConnection) -> DbResult<String> {
    let last: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(CAST(SUBSTR(order_number, 5) AS INTEGER)), 0) FROM orders",
    )
    .fetch_one(&mut *conn)
    .await?;
    Ok(format!("{ORDER_NUMBER_PREFIX}{:06}", last + 1))
}

async fn insert_item(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_items (
            id, order_id, product_id, code_snapshot, name_snapshot,
            unit_price_cents, tax_rate_bps, quantity, line_total_cents, tax_cents
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&item.id)
    .bind(&item.order_id)
    .bind(&item.product_id)
    .bind(&item.code_snapshot)
    .bind(&item.name_snapshot)
    .bind(item.unit_price_cents)
    .bind(item.tax_rate_bps)
    .bind(item.quantity)
    .bind(item.line_total_cents)
    .bind(item.tax_cents)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Decrements stock of a tracked product, failing if it went short since
/// the line was priced.
async fn reserve_stock(conn: &mut SqliteConnection, line: &OrderLine) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE products SET current_stock = current_stock - ?2, updated_at = ?3
        WHERE id = ?1 AND track_inventory = 1 AND current_stock >= ?2
        "#,
    )
    .bind(&line.product_id)
    .bind(line.quantity)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let product = fetch_product(conn, &line.product_id).await?;
        if let Some(p) = product.filter(|p| p.track_inventory) {
            return Err(CoreError::InsufficientStock {
                code: p.code,
                available: p.current_stock,
                requested: line.quantity,
            }
            .into());
        }
    }
    Ok(())
}

async fn adjust_balance(
    conn: &mut SqliteConnection,
    customer_id: &str,
    delta_cents: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if delta_cents == 0 {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO customer_credit (customer_id, credit_limit_cents, current_balance_cents, updated_at)
        VALUES (?1, 0, ?2, ?3)
        ON CONFLICT (customer_id) DO UPDATE SET
            current_balance_cents = current_balance_cents + excluded.current_balance_cents,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(customer_id)
    .bind(delta_cents)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_status(
    conn: &mut SqliteConnection,
    order: &Order,
    next: OrderStatus,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query("UPDATE orders SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2")
        .bind(&order.id)
        .bind(order.status)
        .bind(next)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Order", &order.id));
    }
    Ok(())
}

async fn cancel_in_tx(conn: &mut SqliteConnection, order: Order) -> DbResult<Order> {
    order.status.transition(OrderStatus::Cancelled)?;
    let now = Utc::now();

    let items: Vec<(String, i64)> =
        sqlx::query_as("SELECT product_id, quantity FROM order_items WHERE order_id = ?1")
            .bind(&order.id)
            .fetch_all(&mut *conn)
            .await?;

    for (product_id, quantity) in &items {
        sqlx::query(
            r#"
            UPDATE products SET current_stock = current_stock + ?2, updated_at = ?3
            WHERE id = ?1 AND track_inventory = 1
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    adjust_balance(conn, &order.customer_id, -outstanding(&order), now).await?;
    write_status(conn, &order, OrderStatus::Cancelled, now).await?;

    Ok(Order {
        status: OrderStatus::Cancelled,
        updated_at: now,
        ..order
    })
}
