//! # Invoice-Update Poller
//!
//! Periodically asks SIIGO which invoices changed and folds those changes
//! into the local orders they belong to.
//!
//! ## Poll Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cursor = sync_state["invoice_poller.last_run"]                        │
//! │           (none yet → now − initial_lookback)                          │
//! │  since  = cursor − overlap                                             │
//! │                                                                         │
//! │  GET /v1/invoices?updated_start=<since>&page=N                         │
//! │     │                                                                   │
//! │     ▼  for each invoice                                                 │
//! │  local order with siigo_invoice_id? ── no ──► ignore                   │
//! │     │ yes                                                               │
//! │     ▼                                                                   │
//! │  diff_invoice(order, invoice) ── empty ──► nothing to do               │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  apply_invoice_patch (annulled → order cancelled)                      │
//! │  siigo_sync_log: invoice_update                                        │
//! │                                                                         │
//! │  all pages fetched, every change stored → cursor = cycle start time    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cursor only moves when a cycle finishes and every matched invoice was
//! stored; otherwise the next tick repeats the window from the same point. The overlap re-reads
//! invoices edited while the previous cycle was running, and the diff makes
//! re-reading them harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use surtido_core::{OrderStatus, SyncAction, SyncLogStatus};
use surtido_db::{Database, NewSyncLogEntry};

use crate::client::SiigoClient;
use crate::config::PollerSettings;
use crate::error::{SiigoError, SiigoResult};
use crate::mapping::{annulment_blocked, diff_invoice};
use crate::model::SiigoInvoice;

/// `sync_state` key holding the start time of the last complete cycle.
pub const CURSOR_KEY: &str = "invoice_poller.last_run";

const MAX_PAGES: u32 = 1_000;

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub since: Option<DateTime<Utc>>,
    pub pages: u32,
    pub invoices_seen: u64,
    /// Invoices that belong to a local order.
    pub matched: u64,
    pub patched: u64,
    pub cancelled: u64,
    pub failed: u64,
    /// Failures that keep the cursor where it was (local lookup or write).
    pub held_back: u64,
    /// Annulled invoices whose order was already dispatched, reported once.
    pub annul_skipped: u64,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Last outcome of the poller, shared with the agent's status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerState {
    pub last_report: Option<PollReport>,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

type PollReply = oneshot::Sender<SiigoResult<PollReport>>;

/// Handle for controlling a running poller.
#[derive(Clone)]
pub struct InvoicePollerHandle {
    trigger_tx: mpsc::Sender<PollReply>,
    shutdown_tx: mpsc::Sender<()>,
    state: Arc<RwLock<PollerState>>,
}

impl InvoicePollerHandle {
    /// Runs a cycle now and waits for its result.
    pub async fn poll_now(&self) -> SiigoResult<PollReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger_tx
            .send(reply_tx)
            .await
            .map_err(|_| SiigoError::ShuttingDown)?;
        reply_rx
            .await
            .map_err(|_| SiigoError::ChannelError("Poller dropped the reply".into()))?
    }

    pub async fn state(&self) -> PollerState {
        self.state.read().await.clone()
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SiigoResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SiigoError::ChannelError("Shutdown channel closed".into()))
    }
}

/// The poller itself. [`InvoicePoller::poll_once`] can be used directly;
/// [`InvoicePoller::spawn`] runs it on a timer.
pub struct InvoicePoller {
    db: Database,
    client: Arc<SiigoClient>,
    settings: PollerSettings,
    state: Arc<RwLock<PollerState>>,
}

impl InvoicePoller {
    pub fn new(db: Database, client: Arc<SiigoClient>, settings: PollerSettings) -> Self {
        InvoicePoller {
            db,
            client,
            settings,
            state: Arc::new(RwLock::new(PollerState::default())),
        }
    }

    /// Starts the timer loop on the current runtime.
    pub fn spawn(self) -> (InvoicePollerHandle, tokio::task::JoinHandle<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = InvoicePollerHandle {
            trigger_tx,
            shutdown_tx,
            state: self.state.clone(),
        };
        let task = tokio::spawn(self.run(trigger_rx, shutdown_rx));

        (handle, task)
    }

    async fn run(self, mut trigger_rx: mpsc::Receiver<PollReply>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(interval_secs = self.settings.interval_secs, "Invoice poller starting");

        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick(), if self.settings.enabled => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Invoice poll failed");
                    }
                }

                Some(reply) = trigger_rx.recv() => {
                    let result = self.poll_once().await;
                    // Caller may have given up waiting
                    let _ = reply.send(result);
                }

                _ = shutdown_rx.recv() => {
                    info!("Invoice poller shutting down");
                    break;
                }
            }
        }

        info!("Invoice poller stopped");
    }

    /// Runs one full cycle.
    pub async fn poll_once(&self) -> SiigoResult<PollReport> {
        let cycle_start = Utc::now();
        let result = self.cycle(cycle_start).await;

        let mut state = self.state.write().await;
        state.last_run_at = Some(cycle_start);
        match &result {
            Ok(report) => {
                state.last_report = Some(report.clone());
                state.last_error = None;
            }
            Err(e) => state.last_error = Some(e.to_string()),
        }

        result
    }

    async fn cycle(&self, cycle_start: DateTime<Utc>) -> SiigoResult<PollReport> {
        let since = self.since(cycle_start).await?;
        let mut report = PollReport {
            since: Some(since),
            ..Default::default()
        };

        debug!(%since, "Polling SIIGO invoices");

        let mut page = 1;
        loop {
            let batch = self
                .client
                .list_invoices(since, page, self.settings.page_size)
                .await?;

            report.pages += 1;
            report.invoices_seen += batch.results.len() as u64;

            for invoice in &batch.results {
                self.apply(invoice, &mut report).await;
            }

            if !batch.has_more() {
                break;
            }
            if page >= MAX_PAGES {
                warn!(page, "Invoice poll stopped at page limit");
                break;
            }
            page += 1;
        }

        if report.held_back == 0 {
            self.db
                .sync_log()
                .set_state(CURSOR_KEY, &cycle_start.to_rfc3339())
                .await?;
        } else {
            warn!(held_back = report.held_back, %since, "Invoice changes not stored, poll cursor kept");
        }

        report.finished_at = Some(Utc::now());
        if report.patched > 0 || report.failed > 0 {
            info!(
                seen = report.invoices_seen,
                patched = report.patched,
                cancelled = report.cancelled,
                failed = report.failed,
                "Invoice poll finished"
            );
        } else {
            debug!(seen = report.invoices_seen, "Invoice poll finished, nothing changed");
        }

        Ok(report)
    }

    /// Start of the window for this cycle.
    async fn since(&self, now: DateTime<Utc>) -> SiigoResult<DateTime<Utc>> {
        let overlap = chrono::Duration::seconds(self.settings.overlap_secs as i64);

        let cursor = match self.db.sync_log().get_state(CURSOR_KEY).await? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    warn!(value = %raw, error = %e, "Ignoring unreadable poll cursor");
                    None
                }
            },
            None => None,
        };

        Ok(match cursor {
            Some(at) => at - overlap,
            None => now - chrono::Duration::hours(self.settings.initial_lookback_hours as i64),
        })
    }

    async fn apply(&self, invoice: &SiigoInvoice, report: &mut PollReport) {
        let orders = self.db.orders();
        let order = match orders.get_by_siigo_invoice_id(&invoice.id).await {
            Ok(Some(order)) => order,
            Ok(None) => return,
            Err(e) => {
                report.failed += 1;
                report.held_back += 1;
                warn!(siigo_invoice_id = %invoice.id, error = %e, "Order lookup failed");
                return;
            }
        };
        report.matched += 1;

        if annulment_blocked(&order, invoice) && !self.annulment_reported(&order.id, &invoice.id).await {
            report.annul_skipped += 1;
            warn!(order_number = %order.order_number, status = %order.status, siigo_invoice_id = %invoice.id, "Invoice annulled in SIIGO but the order can no longer be cancelled");
            self.log_entry(
                &order.id,
                &invoice.id,
                SyncLogStatus::Skipped,
                format!("invoice annulled in SIIGO; order is {} and was not cancelled", order.status),
            )
            .await;
        }

        let patch = match diff_invoice(&order, invoice) {
            Ok(patch) if patch.is_empty() => return,
            Ok(patch) => patch,
            Err(e) => {
                report.failed += 1;
                self.log_entry(&order.id, &invoice.id, SyncLogStatus::Error, e.to_string())
                    .await;
                return;
            }
        };

        match orders.apply_invoice_patch(&order.id, &patch).await {
            Ok(updated) => {
                report.patched += 1;
                if updated.status == OrderStatus::Cancelled && order.status != OrderStatus::Cancelled {
                    report.cancelled += 1;
                }
                let message = serde_json::to_string(&patch).unwrap_or_default();
                info!(order_number = %updated.order_number, siigo_invoice_id = %invoice.id, %message, "Order updated from SIIGO invoice");
                self.log_entry(&order.id, &invoice.id, SyncLogStatus::Success, message)
                    .await;
            }
            Err(e) => {
                report.failed += 1;
                report.held_back += 1;
                warn!(order_number = %order.order_number, error = %e, "Could not apply invoice changes");
                self.log_entry(&order.id, &invoice.id, SyncLogStatus::Error, e.to_string())
                    .await;
            }
        }
    }

    /// Whether a blocked annulment of this invoice is already in the log.
    async fn annulment_reported(&self, order_id: &str, invoice_id: &str) -> bool {
        match self.db.sync_log().for_entity("order", order_id, 50).await {
            Ok(entries) => entries.iter().any(|e| {
                e.status == SyncLogStatus::Skipped
                    && e.action == SyncAction::InvoiceUpdate
                    && e.siigo_id.as_deref() == Some(invoice_id)
            }),
            Err(e) => {
                warn!(error = %e, "Could not read sync log");
                false
            }
        }
    }

    async fn log_entry(&self, order_id: &str, invoice_id: &str, status: SyncLogStatus, message: String) {
        let entry = NewSyncLogEntry::new("order", SyncAction::InvoiceUpdate, status)
            .entity_id(order_id)
            .siigo_id(invoice_id)
            .message(message);
        if let Err(e) = self.db.sync_log().record(&entry).await {
            warn!(error = %e, "Failed to write sync log entry");
        }
    }
}
