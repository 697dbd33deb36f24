mod common;

use std::sync::Arc;

use chrono::DateTime;
use serde_json::json;

use common::{customer_json, memory_db, product_json, FakeSiigo};
use surtido_core::{OrderStatus, SyncAction, SyncLogStatus};
use surtido_db::{Database, NewOrder, NewOrderItem, NewProduct, OrderWithItems};
use surtido_siigo::poller::CURSOR_KEY;
use surtido_siigo::{
    InvoicePoller, InvoiceService, Importer, SiigoClient, SiigoError, StockOutcome, StockQueue,
    StockWorker, SyncAgent,
};

struct Fixture {
    siigo: FakeSiigo,
    db: Database,
    client: Arc<SiigoClient>,
}

async fn fixture() -> Fixture {
    let siigo = FakeSiigo::start().await;
    {
        let mut products = siigo.state.products.lock().unwrap();
        products.push(product_json("sp-1", "GAL-500", "Galletas 500g", 4500.0, 12));
        products.push(product_json("sp-2", "ARZ-1K", "Arroz 1kg", 3900.0, 40));
        products.push(product_json("sp-3", "ACE-900", "Aceite 900ml", 12500.0, 8));
    }
    siigo
        .state
        .customers
        .lock()
        .unwrap()
        .push(customer_json("sc-1", "900123456", "Tienda La Esquina"));

    let db = memory_db().await;
    let client = Arc::new(SiigoClient::new(&siigo.config()).unwrap());
    Fixture { siigo, db, client }
}

impl Fixture {
    fn importer(&self) -> Importer {
        Importer::new(self.db.clone(), self.client.clone(), self.siigo.config().import)
    }

    async fn import_all(&self) {
        let importer = self.importer();
        importer.import_products().await.unwrap();
        importer.import_customers().await.unwrap();
    }

    /// Confirmed order for two units of GAL-500.
    async fn confirmed_order(&self) -> OrderWithItems {
        let customer = self
            .db
            .customers()
            .get_by_identification("900123456-7")
            .await
            .unwrap()
            .unwrap();
        let product = self.db.products().get_by_siigo_id("sp-1").await.unwrap().unwrap();

        let order = self
            .db
            .orders()
            .create(&NewOrder {
                customer_id: customer.id,
                notes: None,
                items: vec![NewOrderItem {
                    product_id: product.id,
                    quantity: 2,
                }],
            })
            .await
            .unwrap();
        self.db
            .orders()
            .update_status(&order.order.id, OrderStatus::Confirmed)
            .await
            .unwrap();
        order
    }

    fn invoicer(&self) -> InvoiceService {
        InvoiceService::new(self.db.clone(), self.client.clone(), self.siigo.config().invoice)
    }

    fn poller(&self) -> InvoicePoller {
        InvoicePoller::new(self.db.clone(), self.client.clone(), self.siigo.config().poller)
    }
}

// =============================================================================
// Importer
// =============================================================================

#[tokio::test]
async fn test_product_import_inserts_then_reports_unchanged() {
    let fx = fixture().await;
    let importer = fx.importer();

    let first = importer.import_products().await.unwrap();
    assert_eq!(first.pages, 2);
    assert_eq!(first.fetched, 3);
    assert_eq!(first.inserted, 3);
    assert!(first.complete);

    let galletas = fx.db.products().get_by_code("GAL-500").await.unwrap().unwrap();
    assert_eq!(galletas.siigo_id.as_deref(), Some("sp-1"));
    assert_eq!(galletas.price_cents, 450_000);
    assert_eq!(galletas.tax_rate_bps, 1900);
    assert_eq!(galletas.current_stock, 12);
    assert_eq!(galletas.group_name.as_deref(), Some("Abarrotes"));

    let second = importer.import_products().await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, 3);

    fx.siigo.state.products.lock().unwrap()[1]["prices"][0]["price_list"][0]["value"] = json!(4100);
    let third = importer.import_products().await.unwrap();
    assert_eq!(third.updated, 1);
    assert_eq!(third.unchanged, 2);

    let summary = fx.db.sync_log().recent(1).await.unwrap();
    assert_eq!(summary[0].entity_type, "import");
    assert_eq!(summary[0].action, SyncAction::ProductImport);
    assert_eq!(summary[0].status, SyncLogStatus::Success);
}

#[tokio::test]
async fn test_product_import_links_existing_local_product_by_code() {
    let fx = fixture().await;
    let local = fx
        .db
        .products()
        .insert(&NewProduct {
            code: "ACE-900".into(),
            name: "Aceite".into(),
            description: None,
            group_name: None,
            price_cents: 1_000_000,
            tax_rate_bps: 1900,
            track_inventory: true,
            current_stock: 3,
        })
        .await
        .unwrap();

    let report = fx.importer().import_products().await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.updated, 1);

    let linked = fx.db.products().get_by_id(&local.id).await.unwrap().unwrap();
    assert_eq!(linked.siigo_id.as_deref(), Some("sp-3"));
    assert_eq!(linked.name, "Aceite 900ml");
}

#[tokio::test]
async fn test_bad_product_is_logged_and_import_continues() {
    let fx = fixture().await;
    fx.siigo.state.products.lock().unwrap()[0]["code"] = json!("");

    let report = fx.importer().import_products().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.inserted, 2);

    let recent = fx.db.sync_log().recent(10).await.unwrap();
    let failure = recent
        .iter()
        .find(|e| e.entity_type == "product")
        .unwrap();
    assert_eq!(failure.siigo_id.as_deref(), Some("sp-1"));
    assert_eq!(failure.status, SyncLogStatus::Error);
    assert_eq!(recent[0].status, SyncLogStatus::Error); // summary reflects the failure
}

#[tokio::test]
async fn test_deactivates_products_missing_from_complete_import() {
    let fx = fixture().await;
    let mut settings = fx.siigo.config().import;
    settings.deactivate_missing = true;
    let importer = Importer::new(fx.db.clone(), fx.client.clone(), settings);

    importer.import_products().await.unwrap();
    fx.siigo.state.products.lock().unwrap().retain(|p| p["id"] != "sp-2");

    let report = importer.import_products().await.unwrap();
    assert_eq!(report.deactivated, 1);
    let rice = fx.db.products().get_by_siigo_id("sp-2").await.unwrap().unwrap();
    assert!(!rice.is_active);
}

#[tokio::test]
async fn test_incomplete_import_does_not_deactivate() {
    let fx = fixture().await;
    let mut settings = fx.siigo.config().import;
    settings.deactivate_missing = true;
    let importer = Importer::new(fx.db.clone(), fx.client.clone(), settings);

    importer.import_products().await.unwrap();
    fx.siigo.state.broken_pages.lock().unwrap().insert(2);

    let report = importer.import_products().await.unwrap();
    assert!(!report.complete);
    assert_eq!(report.pages, 1);
    assert_eq!(report.deactivated, 0);

    let oil = fx.db.products().get_by_siigo_id("sp-3").await.unwrap().unwrap();
    assert!(oil.is_active);
}

#[tokio::test]
async fn test_customer_import() {
    let fx = fixture().await;

    let report = fx.importer().import_customers().await.unwrap();
    assert_eq!(report.inserted, 1);

    let customer = fx
        .db
        .customers()
        .get_by_identification("900123456-7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(customer.name, "Tienda La Esquina");
    assert_eq!(customer.email.as_deref(), Some("compras@example.co"));

    // New customers start cash-only
    let credit = fx.db.customers().get_credit(&customer.id).await.unwrap();
    assert_eq!(credit.credit_limit_cents, 0);
}

// =============================================================================
// Invoicing
// =============================================================================

#[tokio::test]
async fn test_invoice_confirmed_order() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;

    let invoiced = fx.invoicer().invoice_order(&order.order.id).await.unwrap();

    assert_eq!(invoiced.order.status, OrderStatus::Invoiced);
    assert_eq!(invoiced.order.siigo_invoice_id.as_deref(), Some("inv-1001"));
    assert_eq!(invoiced.order.siigo_invoice_number.as_deref(), Some("FV-1-1001"));
    assert_eq!(invoiced.order.siigo_total_cents, Some(invoiced.order.total_cents));

    let created = fx.siigo.state.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["customer"]["identification"], "900123456");
    assert_eq!(created[0]["items"][0]["code"], "GAL-500");
    assert_eq!(created[0]["items"][0]["taxes"][0]["id"], 13156);
    // Amounts travel as JSON numbers
    assert_eq!(created[0]["items"][0]["quantity"], json!(2.0));
    assert_eq!(created[0]["items"][0]["price"], json!(4500.0));
    assert_eq!(created[0]["payments"][0]["value"], json!(10710.0));

    let log = fx
        .db
        .sync_log()
        .for_entity("order", &order.order.id, 10)
        .await
        .unwrap();
    assert_eq!(log[0].action, SyncAction::InvoiceCreate);
    assert_eq!(log[0].status, SyncLogStatus::Success);
}

#[tokio::test]
async fn test_invoice_rejects_invoiced_and_missing_orders() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    let invoicer = fx.invoicer();

    invoicer.invoice_order(&order.order.id).await.unwrap();
    let again = invoicer.invoice_order(&order.order.id).await.unwrap_err();
    assert!(matches!(again, SiigoError::Rule(_)), "{again:?}");

    let missing = invoicer.invoice_order("no-such-order").await.unwrap_err();
    assert!(matches!(missing, SiigoError::Database(_)), "{missing:?}");

    assert_eq!(fx.siigo.state.created.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_invoicing_creates_one_document() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    fx.siigo.state.set_create_delay(200);

    let first = fx.invoicer();
    let second = fx.invoicer();
    let (a, b) = tokio::join!(
        first.invoice_order(&order.order.id),
        second.invoice_order(&order.order.id)
    );

    assert_eq!(fx.siigo.state.created.lock().unwrap().len(), 1);
    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one success: {other:?}"),
    };
    assert_eq!(ok.order.status, OrderStatus::Invoiced);
    assert!(
        matches!(err, SiigoError::Busy(_) | SiigoError::Rule(_)),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_failed_invoice_creation_releases_the_order() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    let invoicer = fx.invoicer();

    // Not retried for invoice creation
    fx.siigo.state.inject(&[502]);
    let err = invoicer.invoice_order(&order.order.id).await.unwrap_err();
    assert!(matches!(err, SiigoError::Server { status: 502, .. }), "{err:?}");

    let invoiced = invoicer.invoice_order(&order.order.id).await.unwrap();
    assert_eq!(invoiced.order.status, OrderStatus::Invoiced);
    assert_eq!(fx.siigo.state.created.lock().unwrap().len(), 1);
}

// =============================================================================
// Invoice poller
// =============================================================================

#[tokio::test]
async fn test_poller_applies_invoice_changes_once() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    fx.invoicer().invoice_order(&order.order.id).await.unwrap();

    let mut invoice = fx.siigo.state.invoice("inv-1001").unwrap();
    invoice["balance"] = json!(0);
    invoice["stamp"]["status"] = json!("Accepted");
    fx.siigo.state.set_invoice(invoice);

    let poller = fx.poller();
    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.patched, 1);

    let updated = fx.db.orders().get_by_id(&order.order.id).await.unwrap().unwrap();
    assert_eq!(updated.siigo_balance_cents, Some(0));
    assert_eq!(updated.siigo_stamp_status.as_deref(), Some("Accepted"));

    // Paid invoice no longer counts against the customer's credit
    let credit = fx.db.customers().get_credit(&updated.customer_id).await.unwrap();
    assert_eq!(credit.current_balance_cents, 0);

    let again = poller.poll_once().await.unwrap();
    assert_eq!(again.matched, 1);
    assert_eq!(again.patched, 0);
}

#[tokio::test]
async fn test_annulled_invoice_cancels_order_and_restores_stock() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    fx.invoicer().invoice_order(&order.order.id).await.unwrap();

    let before = fx.db.products().get_by_siigo_id("sp-1").await.unwrap().unwrap();
    assert_eq!(before.current_stock, 10);

    let mut invoice = fx.siigo.state.invoice("inv-1001").unwrap();
    invoice["annulled"] = json!(true);
    fx.siigo.state.set_invoice(invoice);

    let report = fx.poller().poll_once().await.unwrap();
    assert_eq!(report.cancelled, 1);

    let cancelled = fx.db.orders().get_by_id(&order.order.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let after = fx.db.products().get_by_siigo_id("sp-1").await.unwrap().unwrap();
    assert_eq!(after.current_stock, 12);
}

#[tokio::test]
async fn test_annulled_invoice_of_dispatched_order_is_reported_once() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    fx.invoicer().invoice_order(&order.order.id).await.unwrap();
    fx.db
        .orders()
        .update_status(&order.order.id, OrderStatus::Dispatched)
        .await
        .unwrap();

    let mut invoice = fx.siigo.state.invoice("inv-1001").unwrap();
    invoice["annulled"] = json!(true);
    fx.siigo.state.set_invoice(invoice);

    let poller = fx.poller();
    let first = poller.poll_once().await.unwrap();
    assert_eq!(first.matched, 1);
    assert_eq!(first.cancelled, 0);
    assert_eq!(first.patched, 0);
    assert_eq!(first.annul_skipped, 1);

    let second = poller.poll_once().await.unwrap();
    assert_eq!(second.cancelled, 0);
    assert_eq!(second.patched, 0);
    assert_eq!(second.annul_skipped, 0);

    let still = fx.db.orders().get_by_id(&order.order.id).await.unwrap().unwrap();
    assert_eq!(still.status, OrderStatus::Dispatched);

    let log = fx
        .db
        .sync_log()
        .for_entity("order", &order.order.id, 20)
        .await
        .unwrap();
    let updates: Vec<_> = log
        .iter()
        .filter(|e| e.action == SyncAction::InvoiceUpdate)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, SyncLogStatus::Skipped);
}

#[tokio::test]
async fn test_poller_keeps_cursor_when_changes_cannot_be_stored() {
    let fx = fixture().await;
    fx.import_all().await;
    let order = fx.confirmed_order().await;
    fx.invoicer().invoice_order(&order.order.id).await.unwrap();

    let poller = fx.poller();
    poller.poll_once().await.unwrap();
    let cursor = fx.db.sync_log().get_state(CURSOR_KEY).await.unwrap();
    assert!(cursor.is_some());

    let mut invoice = fx.siigo.state.invoice("inv-1001").unwrap();
    invoice["balance"] = json!(0);
    fx.siigo.state.set_invoice(invoice);

    sqlx::query(
        "CREATE TRIGGER orders_read_only BEFORE UPDATE ON orders
         BEGIN SELECT RAISE(ABORT, 'orders are read-only'); END",
    )
    .execute(fx.db.pool())
    .await
    .unwrap();

    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.held_back, 1);
    assert_eq!(fx.db.sync_log().get_state(CURSOR_KEY).await.unwrap(), cursor);

    sqlx::query("DROP TRIGGER orders_read_only")
        .execute(fx.db.pool())
        .await
        .unwrap();

    let retried = poller.poll_once().await.unwrap();
    assert_eq!(retried.patched, 1);
    assert_eq!(retried.held_back, 0);
    // The retry reads from the same point as the failed cycle
    assert_eq!(retried.since, report.since);
    assert_ne!(fx.db.sync_log().get_state(CURSOR_KEY).await.unwrap(), cursor);

    let updated = fx.db.orders().get_by_id(&order.order.id).await.unwrap().unwrap();
    assert_eq!(updated.siigo_balance_cents, Some(0));
}

#[tokio::test]
async fn test_poller_cursor_moves_only_after_complete_cycle() {
    let fx = fixture().await;
    let poller = fx.poller();

    fx.siigo.state.inject(&[400]);
    assert!(poller.poll_once().await.is_err());
    assert!(fx.db.sync_log().get_state(CURSOR_KEY).await.unwrap().is_none());

    poller.poll_once().await.unwrap();
    let cursor = fx.db.sync_log().get_state(CURSOR_KEY).await.unwrap().unwrap();
    let cursor = DateTime::parse_from_rfc3339(&cursor).unwrap();

    poller.poll_once().await.unwrap();
    // The rejected request never reached the listing
    let queries = fx.siigo.state.invoice_queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 2);

    let first = DateTime::parse_from_rfc3339(&queries[0]).unwrap();
    let second = DateTime::parse_from_rfc3339(&queries[1]).unwrap();
    // Initial lookback is a day; later cycles start from the cursor minus the overlap
    assert!(first < second);
    assert_eq!((cursor - second).num_seconds(), 600);
}

// =============================================================================
// Stock reconciliation
// =============================================================================

#[tokio::test]
async fn test_stock_worker_reconciles_skips_and_retries() {
    let fx = fixture().await;
    fx.import_all().await;
    fx.confirmed_order().await;

    let linked = fx.db.products().get_by_siigo_id("sp-1").await.unwrap().unwrap();
    assert_eq!(linked.current_stock, 10);
    let local = fx
        .db
        .products()
        .insert(&NewProduct {
            code: "BOL-01".into(),
            name: "Bolsa".into(),
            description: None,
            group_name: None,
            price_cents: 20_000,
            tax_rate_bps: 0,
            track_inventory: false,
            current_stock: 0,
        })
        .await
        .unwrap();
    let gone = fx.db.products().get_by_siigo_id("sp-3").await.unwrap().unwrap();
    fx.siigo.state.products.lock().unwrap().retain(|p| p["id"] != "sp-3");

    let queue = StockQueue::new();
    assert_eq!(
        queue
            .enqueue_many([linked.id.clone(), local.id.clone(), gone.id.clone(), linked.id.clone()])
            .await,
        3
    );

    let settings = fx.siigo.config().stock;
    let worker = StockWorker::new(fx.db.clone(), fx.client.clone(), queue.clone(), settings);

    assert_eq!(
        worker.reconcile(&linked.id).await.unwrap(),
        StockOutcome::Updated { from: 10, to: 12 }
    );
    assert_eq!(worker.reconcile(&linked.id).await.unwrap(), StockOutcome::Unchanged);

    let first = worker.drain_once().await;
    assert_eq!(first.checked, 3);
    assert_eq!(first.unchanged, 1);
    assert_eq!(first.skipped, 1);
    assert_eq!(first.requeued, 1);
    assert_eq!(queue.pending_count().await, 1);

    worker.drain_once().await;
    let last = worker.drain_once().await;
    assert_eq!(last.dropped, 1);
    assert_eq!(queue.pending_count().await, 0);

    let skipped = fx.db.sync_log().for_entity("product", &local.id, 5).await.unwrap();
    assert_eq!(skipped[0].status, SyncLogStatus::Skipped);
    let dropped = fx.db.sync_log().for_entity("product", &gone.id, 5).await.unwrap();
    assert_eq!(dropped[0].status, SyncLogStatus::Error);
}

// =============================================================================
// Agent
// =============================================================================

#[tokio::test]
async fn test_agent_runs_on_demand_and_stops() {
    let fx = fixture().await;
    let mut config = fx.siigo.config();
    config.poller.enabled = false;
    config.stock.enabled = false;

    let agent = SyncAgent::with_client(config, fx.db.clone(), fx.client.clone()).start();

    let report = agent.run_import().await.unwrap();
    assert_eq!(report.inserted, 3);
    agent.run_customer_import().await.unwrap();
    agent.poll_now().await.unwrap();
    assert_eq!(agent.enqueue_stock(["a", "b", "a"]).await, 2);

    let status = agent.status().await;
    assert!(status.running);
    assert_eq!(status.last_product_import.map(|r| r.inserted), Some(3));
    assert!(status.last_customer_import.is_some());
    assert!(status.last_poll_at.is_some());
    assert_eq!(status.pending_stock_checks, 2);

    agent.shutdown().await;
    assert!(!agent.status().await.running);
    assert!(matches!(agent.run_import().await, Err(SiigoError::ShuttingDown)));
}

#[tokio::test]
async fn test_agent_purges_sync_log_past_retention() {
    let fx = fixture().await;
    fx.import_all().await;
    sqlx::query("UPDATE siigo_sync_log SET created_at = ?1")
        .bind(chrono::Utc::now() - chrono::Duration::days(45))
        .execute(fx.db.pool())
        .await
        .unwrap();
    assert!(!fx.db.sync_log().recent(10).await.unwrap().is_empty());

    let mut config = fx.siigo.config();
    config.poller.enabled = false;
    config.stock.enabled = false;
    config.log.retention_days = 30;

    let agent = SyncAgent::with_client(config, fx.db.clone(), fx.client.clone()).start();

    let purged = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        loop {
            if fx.db.sync_log().recent(10).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(purged.is_ok(), "old sync log entries were not purged");

    agent.shutdown().await;
}
