//! # Bulk Importer
//!
//! Pulls the whole SIIGO catalog (or customer list) page by page and merges
//! it into the local database.
//!
//! ## Import Run
//! ```text
//! page = 1
//!   │
//!   ▼
//! GET /v1/products?page=N&page_size=S ──error──► stop, run is incomplete
//!   │
//!   ▼
//! for each product:
//!   map_product ──► upsert_from_siigo ──► inserted | updated | unchanged
//!        └── failure ──► siigo_sync_log (error), failed += 1, continue
//!   │
//!   ▼
//! more pages? ── yes ──► page += 1
//!   │ no
//!   ▼
//! complete && deactivate_missing ──► deactivate products SIIGO no longer lists
//!   │
//!   ▼
//! summary entry in siigo_sync_log, ImportReport returned
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use surtido_core::{SyncAction, SyncLogStatus};
use surtido_db::{Database, NewSyncLogEntry, UpsertOutcome};

use crate::client::SiigoClient;
use crate::config::ImportSettings;
use crate::error::SiigoResult;
use crate::mapping::{map_customer, map_product};
use crate::model::{SiigoCustomer, SiigoProduct};

/// Hard stop for a misbehaving paginator.
const MAX_PAGES: u32 = 10_000;

/// What an import run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub pages: u32,
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub deactivated: u64,
    /// Every page was fetched.
    pub complete: bool,
    pub elapsed_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl ImportReport {
    fn start() -> Self {
        ImportReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// One-line summary for the sync log.
    pub fn summary(&self) -> String {
        format!(
            "pages={} fetched={} inserted={} updated={} unchanged={} failed={} deactivated={} complete={} elapsed_ms={}",
            self.pages,
            self.fetched,
            self.inserted,
            self.updated,
            self.unchanged,
            self.failed,
            self.deactivated,
            self.complete,
            self.elapsed_ms
        )
    }

    fn status(&self) -> SyncLogStatus {
        if self.complete && self.failed == 0 {
            SyncLogStatus::Success
        } else {
            SyncLogStatus::Error
        }
    }
}

/// Product and customer importer.
pub struct Importer {
    db: Database,
    client: Arc<SiigoClient>,
    settings: ImportSettings,
}

impl Importer {
    pub fn new(db: Database, client: Arc<SiigoClient>, settings: ImportSettings) -> Self {
        Importer {
            db,
            client,
            settings,
        }
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Imports the full SIIGO catalog.
    pub async fn import_products(&self) -> SiigoResult<ImportReport> {
        let started = Instant::now();
        let mut report = ImportReport::start();
        let mut seen: HashSet<String> = HashSet::new();
        let mut page = 1;

        info!(page_size = self.settings.page_size, "Starting SIIGO product import");

        loop {
            let batch = match self.client.list_products(page, self.settings.page_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(page, error = %e, "Failed to fetch product page");
                    self.log(
                        NewSyncLogEntry::new("import", SyncAction::ProductImport, SyncLogStatus::Error)
                            .message(format!("page {page}: {e}")),
                    )
                    .await;
                    break;
                }
            };

            report.pages += 1;
            report.fetched += batch.results.len() as u64;
            debug!(page, count = batch.results.len(), total = batch.pagination.total_results, "Fetched product page");

            for product in &batch.results {
                seen.insert(product.id.clone());
                self.import_product(product, &mut report).await;
            }

            if !batch.has_more() {
                report.complete = true;
                break;
            }
            if page >= MAX_PAGES {
                warn!(page, "Product import stopped at page limit");
                break;
            }
            page += 1;
        }

        if self.settings.deactivate_missing {
            if report.complete {
                report.deactivated = self.db.products().deactivate_missing_siigo(&seen).await?;
            } else {
                warn!("Import incomplete, not deactivating missing products");
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        self.log(
            NewSyncLogEntry::new("import", SyncAction::ProductImport, report.status())
                .message(report.summary()),
        )
        .await;

        info!(
            pages = report.pages,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            deactivated = report.deactivated,
            elapsed_ms = report.elapsed_ms,
            "SIIGO product import finished"
        );
        Ok(report)
    }

    async fn import_product(&self, product: &SiigoProduct, report: &mut ImportReport) {
        let result: SiigoResult<(String, UpsertOutcome)> = match map_product(product) {
            Ok(row) => self
                .db
                .products()
                .upsert_from_siigo(&row)
                .await
                .map_err(Into::into),
            Err(e) => Err(e),
        };

        match result {
            Ok((_, outcome)) => report.count(outcome),
            Err(e) => {
                report.failed += 1;
                warn!(siigo_id = %product.id, code = %product.code, error = %e, "Product import failed");
                self.log(
                    NewSyncLogEntry::new("product", SyncAction::ProductImport, SyncLogStatus::Error)
                        .siigo_id(&product.id)
                        .message(e.to_string()),
                )
                .await;
            }
        }
    }

    // =========================================================================
    // Customers
    // =========================================================================

    /// Imports every SIIGO customer. Customers are never deactivated for
    /// being missing.
    pub async fn import_customers(&self) -> SiigoResult<ImportReport> {
        let started = Instant::now();
        let mut report = ImportReport::start();
        let mut page = 1;

        info!("Starting SIIGO customer import");

        loop {
            let batch = match self.client.list_customers(page, self.settings.page_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(page, error = %e, "Failed to fetch customer page");
                    self.log(
                        NewSyncLogEntry::new("import", SyncAction::CustomerImport, SyncLogStatus::Error)
                            .message(format!("page {page}: {e}")),
                    )
                    .await;
                    break;
                }
            };

            report.pages += 1;
            report.fetched += batch.results.len() as u64;

            for customer in &batch.results {
                self.import_customer(customer, &mut report).await;
            }

            if !batch.has_more() {
                report.complete = true;
                break;
            }
            if page >= MAX_PAGES {
                warn!(page, "Customer import stopped at page limit");
                break;
            }
            page += 1;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        self.log(
            NewSyncLogEntry::new("import", SyncAction::CustomerImport, report.status())
                .message(report.summary()),
        )
        .await;

        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "SIIGO customer import finished"
        );
        Ok(report)
    }

    async fn import_customer(&self, customer: &SiigoCustomer, report: &mut ImportReport) {
        let result: SiigoResult<(String, UpsertOutcome)> = match map_customer(customer) {
            Ok(row) => self
                .db
                .customers()
                .upsert_from_siigo(&row)
                .await
                .map_err(Into::into),
            Err(e) => Err(e),
        };

        match result {
            Ok((_, outcome)) => report.count(outcome),
            Err(e) => {
                report.failed += 1;
                warn!(siigo_id = %customer.id, error = %e, "Customer import failed");
                self.log(
                    NewSyncLogEntry::new("customer", SyncAction::CustomerImport, SyncLogStatus::Error)
                        .siigo_id(&customer.id)
                        .message(e.to_string()),
                )
                .await;
            }
        }
    }

    /// Records a sync log entry; a logging failure never fails the import.
    async fn log(&self, entry: NewSyncLogEntry) {
        if let Err(e) = self.db.sync_log().record(&entry).await {
            warn!(error = %e, "Failed to write sync log entry");
        }
    }
}
