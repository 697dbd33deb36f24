//! # Invoicing
//!
//! Turns a confirmed local order into a SIIGO invoice.
//!
//! ```text
//! order (confirmed, no invoice yet)
//!   │  claim_for_invoicing      (one caller at a time; released on failure)
//!   │  build_invoice_request   (document, seller, payment from config;
//!   │                           customer identification; one item per line)
//!   ▼
//! POST /v1/invoices
//!   │
//!   ▼
//! mark_invoiced (invoice id, number, total, balance) ──► status = invoiced
//! siigo_sync_log: invoice_create
//! ```

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use surtido_core::{CoreError, Customer, Money, OrderStatus, SyncAction, SyncLogStatus};
use surtido_db::{Database, DbError, NewSyncLogEntry, OrderWithItems};

use crate::client::SiigoClient;
use crate::config::InvoiceSettings;
use crate::error::{SiigoError, SiigoResult};
use crate::mapping::{cents_to_decimal, identification_number, invoice_link};
use crate::model::{
    IdRef, InvoiceCustomerRef, InvoiceItemRequest, InvoicePaymentRequest, InvoiceRequest,
    SiigoInvoice,
};

/// Builds the SIIGO invoice body for an order.
pub fn build_invoice_request(
    order: &OrderWithItems,
    customer: &Customer,
    settings: &InvoiceSettings,
    date: NaiveDate,
) -> SiigoResult<InvoiceRequest> {
    if !settings.is_configured() {
        return Err(SiigoError::InvalidConfig(
            "invoice.document_id, invoice.seller_id and invoice.payment_method_id must be set"
                .into(),
        ));
    }

    let items = order
        .items
        .iter()
        .map(|item| InvoiceItemRequest {
            code: item.code_snapshot.clone(),
            description: item.name_snapshot.clone(),
            quantity: Decimal::from(item.quantity),
            price: cents_to_decimal(Money::from_cents(item.unit_price_cents)),
            taxes: match settings.tax_id {
                Some(id) if item.tax_rate_bps > 0 => vec![IdRef { id }],
                _ => Vec::new(),
            },
        })
        .collect();

    let due_date = date
        .checked_add_days(Days::new(u64::from(settings.due_days)))
        .unwrap_or(date);

    let observations = match &order.order.notes {
        Some(notes) if !notes.trim().is_empty() => {
            format!("Pedido {} - {}", order.order.order_number, notes.trim())
        }
        _ => format!("Pedido {}", order.order.order_number),
    };

    Ok(InvoiceRequest {
        document: IdRef {
            id: settings.document_id,
        },
        date: date.format("%Y-%m-%d").to_string(),
        customer: InvoiceCustomerRef {
            id: None,
            identification: identification_number(&customer.identification).to_string(),
            branch_office: 0,
        },
        seller: settings.seller_id,
        observations: Some(observations),
        items,
        payments: vec![InvoicePaymentRequest {
            id: settings.payment_method_id,
            value: cents_to_decimal(order.order.total()),
            due_date: due_date.format("%Y-%m-%d").to_string(),
        }],
    })
}

/// Creates SIIGO invoices for local orders.
pub struct InvoiceService {
    db: Database,
    client: Arc<SiigoClient>,
    settings: InvoiceSettings,
}

impl InvoiceService {
    pub fn new(db: Database, client: Arc<SiigoClient>, settings: InvoiceSettings) -> Self {
        InvoiceService {
            db,
            client,
            settings,
        }
    }

    /// Invoices a confirmed order and returns it in `invoiced` status.
    pub async fn invoice_order(&self, order_id: &str) -> SiigoResult<OrderWithItems> {
        let orders = self.db.orders();
        let order = orders
            .get_with_items(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;

        if order.order.status != OrderStatus::Confirmed || order.order.is_invoiced() {
            return Err(CoreError::InvalidStatusTransition {
                from: order.order.status,
                to: OrderStatus::Invoiced,
            }
            .into());
        }

        if !orders.claim_for_invoicing(order_id).await? {
            return Err(SiigoError::Busy(format!(
                "Invoicing of order {}",
                order.order.order_number
            )));
        }

        let invoice = match self.create_invoice(&order).await {
            Ok(invoice) => invoice,
            Err(e) => {
                warn!(order_number = %order.order.order_number, error = %e, "SIIGO invoice creation failed");
                if let Err(release) = orders.release_invoice_claim(order_id).await {
                    error!(order_number = %order.order.order_number, error = %release, "Could not release invoice claim");
                }
                self.log(order_id, None, SyncLogStatus::Error, e.to_string()).await;
                return Err(e);
            }
        };

        // From here on the document exists in SIIGO. On failure the claim is
        // kept so the order cannot be invoiced a second time.
        let stored = match invoice_link(&invoice) {
            Ok(link) => orders
                .mark_invoiced(order_id, &link)
                .await
                .map(|_| link)
                .map_err(SiigoError::from),
            Err(e) => Err(e),
        };
        let link = match stored {
            Ok(link) => link,
            Err(e) => {
                error!(
                    order_number = %order.order.order_number,
                    siigo_invoice_id = %invoice.id,
                    error = %e,
                    "Invoice created in SIIGO but the order could not be updated"
                );
                self.log(
                    order_id,
                    Some(&invoice.id),
                    SyncLogStatus::Error,
                    format!("invoice created but order not updated: {e}"),
                )
                .await;
                return Err(e);
            }
        };

        info!(
            order_number = %order.order.order_number,
            invoice = ?link.number,
            total_cents = link.total_cents,
            "Order invoiced in SIIGO"
        );
        self.log(
            order_id,
            Some(&invoice.id),
            SyncLogStatus::Success,
            link.number.clone().unwrap_or_else(|| invoice.id.clone()),
        )
        .await;

        Ok(orders
            .get_with_items(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?)
    }

    async fn create_invoice(&self, order: &OrderWithItems) -> SiigoResult<SiigoInvoice> {
        let customer = self
            .db
            .customers()
            .get_by_id(&order.order.customer_id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", &order.order.customer_id))?;

        let request = build_invoice_request(order, &customer, &self.settings, Utc::now().date_naive())?;
        self.client.create_invoice(&request).await
    }

    async fn log(&self, order_id: &str, invoice_id: Option<&str>, status: SyncLogStatus, message: String) {
        let mut entry = NewSyncLogEntry::new("order", SyncAction::InvoiceCreate, status)
            .entity_id(order_id)
            .message(message);
        if let Some(id) = invoice_id {
            entry = entry.siigo_id(id);
        }
        if let Err(e) = self.db.sync_log().record(&entry).await {
            warn!(error = %e, "Failed to write sync log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surtido_core::{Order, OrderItem};

    fn order() -> OrderWithItems {
        let now = Utc::now();
        let line = |code: &str, price: i64, bps: u32, qty: i64| OrderItem {
            id: format!("item-{code}"),
            order_id: "o1".into(),
            product_id: format!("p-{code}"),
            code_snapshot: code.into(),
            name_snapshot: format!("Producto {code}"),
            unit_price_cents: price,
            tax_rate_bps: bps,
            quantity: qty,
            line_total_cents: price * qty,
            tax_cents: 0,
        };
        OrderWithItems {
            order: Order {
                id: "o1".into(),
                order_number: "PED-000042".into(),
                customer_id: "c1".into(),
                status: OrderStatus::Confirmed,
                subtotal_cents: 25_000,
                tax_cents: 1_900,
                total_cents: 26_900,
                notes: Some("Entregar en la mañana".into()),
                siigo_invoice_id: None,
                siigo_invoice_number: None,
                siigo_total_cents: None,
                siigo_balance_cents: None,
                siigo_stamp_status: None,
                invoiced_at: None,
                created_at: now,
                updated_at: now,
            },
            items: vec![line("GAL-500", 10_000, 1900, 1), line("ARZ-1K", 5_000, 0, 3)],
        }
    }

    fn customer() -> Customer {
        let now = Utc::now();
        Customer {
            id: "c1".into(),
            siigo_id: Some("cust-1".into()),
            identification: "900123456-7".into(),
            name: "Tienda La Esquina".into(),
            email: None,
            phone: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn settings() -> InvoiceSettings {
        InvoiceSettings {
            document_id: 24446,
            seller_id: 629,
            payment_method_id: 5636,
            tax_id: Some(13156),
            due_days: 30,
        }
    }

    #[test]
    fn test_build_invoice_request() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let req = build_invoice_request(&order(), &customer(), &settings(), date).unwrap();

        assert_eq!(req.document.id, 24446);
        assert_eq!(req.seller, 629);
        assert_eq!(req.date, "2024-05-10");
        assert_eq!(req.customer.identification, "900123456");
        assert_eq!(
            req.observations.as_deref(),
            Some("Pedido PED-000042 - Entregar en la mañana")
        );

        assert_eq!(req.items.len(), 2);
        assert_eq!(req.items[0].code, "GAL-500");
        assert_eq!(req.items[0].price, Decimal::new(10_000, 2));
        assert_eq!(req.items[0].taxes, vec![IdRef { id: 13156 }]);
        assert!(req.items[1].taxes.is_empty());
        assert_eq!(req.items[1].quantity, Decimal::from(3));

        assert_eq!(req.payments[0].id, 5636);
        assert_eq!(req.payments[0].value, Decimal::new(26_900, 2));
        assert_eq!(req.payments[0].due_date, "2024-06-09");
    }

    #[test]
    fn test_unconfigured_invoicing_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let err = build_invoice_request(&order(), &customer(), &InvoiceSettings::default(), date)
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
