//! # Sync Agent
//!
//! Owns every background task that talks to SIIGO and gives the rest of the
//! application one cloneable handle to drive them.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │  • Builds the shared SiigoClient (one rate limiter, one token)   │  │
//! │  │  • Spawns the background tasks below                             │  │
//! │  │  • Hands out a SyncAgentHandle                                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ InvoicePoller  │  │  StockWorker   │  │ Periodic import        │    │
//! │  │ every          │  │ every          │  │ every                  │    │
//! │  │ interval_secs  │  │ drain_interval │  │ import.interval_secs   │    │
//! │  │                │  │                │  │ (0 = disabled)         │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  Sync log cleanup every log.cleanup_interval_secs (retention 0 = off)  │
//! │                                                                         │
//! │  ON DEMAND (through the handle):                                       │
//! │  run_import / run_customer_import  (one import at a time)             │
//! │  poll_now / enqueue_stock / invoice_order / status / shutdown          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use surtido_db::{Database, OrderWithItems};

use crate::client::SiigoClient;
use crate::config::{LogSettings, SiigoConfig};
use crate::error::{SiigoError, SiigoResult};
use crate::importer::{ImportReport, Importer};
use crate::invoicing::InvoiceService;
use crate::poller::{InvoicePoller, InvoicePollerHandle, PollReport};
use crate::stock::{StockQueue, StockWorker, StockWorkerHandle};

// =============================================================================
// Sync Status
// =============================================================================

/// Snapshot of the agent for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// False once shutdown has been requested.
    pub running: bool,

    pub last_product_import: Option<ImportReport>,
    pub last_customer_import: Option<ImportReport>,

    /// Start time of the last poll cycle, successful or not.
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_poll: Option<PollReport>,
    pub last_poll_error: Option<String>,

    /// Products waiting for a stock check.
    pub pending_stock_checks: usize,

    /// Most recent error from an import or invoicing call.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct AgentState {
    running: bool,
    last_product_import: Option<ImportReport>,
    last_customer_import: Option<ImportReport>,
    last_error: Option<String>,
}

/// Pieces shared by the handle and the periodic import task.
struct Shared {
    importer: Importer,
    invoicer: InvoiceService,
    queue: StockQueue,
    import_lock: Mutex<()>,
    state: RwLock<AgentState>,
}

impl Shared {
    async fn ensure_running(&self) -> SiigoResult<()> {
        if self.state.read().await.running {
            Ok(())
        } else {
            Err(SiigoError::ShuttingDown)
        }
    }

    async fn import_products(&self) -> SiigoResult<ImportReport> {
        let _guard = self
            .import_lock
            .try_lock()
            .map_err(|_| SiigoError::Busy("Import".into()))?;

        let result = self.importer.import_products().await;
        let mut state = self.state.write().await;
        match &result {
            Ok(report) => state.last_product_import = Some(report.clone()),
            Err(e) => state.last_error = Some(format!("product import: {e}")),
        }
        result
    }

    async fn import_customers(&self) -> SiigoResult<ImportReport> {
        let _guard = self
            .import_lock
            .try_lock()
            .map_err(|_| SiigoError::Busy("Import".into()))?;

        let result = self.importer.import_customers().await;
        let mut state = self.state.write().await;
        match &result {
            Ok(report) => state.last_customer_import = Some(report.clone()),
            Err(e) => state.last_error = Some(format!("customer import: {e}")),
        }
        result
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Builds the SIIGO background machinery. Call [`SyncAgent::start`] from
/// inside a Tokio runtime.
pub struct SyncAgent {
    config: SiigoConfig,
    db: Database,
    client: Arc<SiigoClient>,
}

impl SyncAgent {
    /// Validates the configuration and creates the HTTP client.
    pub fn new(config: SiigoConfig, db: Database) -> SiigoResult<Self> {
        config.validate()?;
        let client = Arc::new(SiigoClient::new(&config)?);
        Ok(Self::with_client(config, db, client))
    }

    /// Uses an existing client, e.g. one pointed at a test server.
    pub fn with_client(config: SiigoConfig, db: Database, client: Arc<SiigoClient>) -> Self {
        SyncAgent { config, db, client }
    }

    /// Spawns the background tasks and returns the control handle.
    pub fn start(self) -> SyncAgentHandle {
        let SyncAgent { config, db, client } = self;

        info!(
            base_url = %config.api.base_url,
            poll_interval_secs = config.poller.interval_secs,
            import_interval_secs = config.import.interval_secs,
            stock_enabled = config.stock.enabled,
            "Starting SIIGO sync agent"
        );

        let queue = StockQueue::new();
        let shared = Arc::new(Shared {
            importer: Importer::new(db.clone(), client.clone(), config.import.clone()),
            invoicer: InvoiceService::new(db.clone(), client.clone(), config.invoice.clone()),
            queue: queue.clone(),
            import_lock: Mutex::new(()),
            state: RwLock::new(AgentState {
                running: true,
                ..Default::default()
            }),
        });

        let (poller, _) = InvoicePoller::new(db.clone(), client.clone(), config.poller.clone()).spawn();

        let cleanup_shutdown = if config.log.retention_days > 0 {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(log_cleanup(db.clone(), config.log.clone(), rx));
            Some(tx)
        } else {
            info!("Sync log retention disabled, entries are kept forever");
            None
        };

        let stock = if config.stock.enabled {
            let (handle, _) = StockWorker::new(db, client, queue, config.stock.clone()).spawn();
            Some(handle)
        } else {
            info!("Stock reconciliation disabled, queued products will not be checked");
            None
        };

        let import_shutdown = if config.import.interval_secs > 0 {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(periodic_import(
                shared.clone(),
                Duration::from_secs(config.import.interval_secs),
                rx,
            ));
            Some(tx)
        } else {
            None
        };

        SyncAgentHandle {
            shared,
            poller,
            stock,
            import_shutdown,
            cleanup_shutdown,
        }
    }
}

/// Full product and customer import on a timer. The first run happens one
/// interval after start.
async fn periodic_import(shared: Arc<Shared>, every: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
    info!(interval_secs = every.as_secs(), "Periodic import starting");

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match shared.import_products().await {
                    Ok(_) => {}
                    Err(SiigoError::Busy(_)) => {
                        debug!("Import already running, skipping scheduled run");
                        continue;
                    }
                    Err(e) => error!(error = %e, "Scheduled product import failed"),
                }
                if let Err(e) = shared.import_customers().await {
                    error!(error = %e, "Scheduled customer import failed");
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Periodic import shutting down");
                break;
            }
        }
    }
}

/// Deletes sync log entries past the retention period, once at start and
/// then on every interval.
async fn log_cleanup(db: Database, settings: LogSettings, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut interval = tokio::time::interval(Duration::from_secs(settings.cleanup_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match db.sync_log().cleanup_old_entries(settings.retention_days).await {
                    Ok(0) => debug!("No sync log entries past retention"),
                    Ok(deleted) => info!(deleted, retention_days = settings.retention_days, "Purged old sync log entries"),
                    Err(e) => warn!(error = %e, "Sync log cleanup failed"),
                }
            }

            _ = shutdown_rx.recv() => {
                debug!("Sync log cleanup shutting down");
                break;
            }
        }
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Cloneable handle used by the REST layer.
#[derive(Clone)]
pub struct SyncAgentHandle {
    shared: Arc<Shared>,
    poller: InvoicePollerHandle,
    stock: Option<StockWorkerHandle>,
    import_shutdown: Option<mpsc::Sender<()>>,
    cleanup_shutdown: Option<mpsc::Sender<()>>,
}

impl SyncAgentHandle {
    pub async fn status(&self) -> SyncStatus {
        let poller = self.poller.state().await;
        let pending_stock_checks = self.shared.queue.pending_count().await;
        let state = self.shared.state.read().await;

        SyncStatus {
            running: state.running,
            last_product_import: state.last_product_import.clone(),
            last_customer_import: state.last_customer_import.clone(),
            last_poll_at: poller.last_run_at,
            last_poll: poller.last_report,
            last_poll_error: poller.last_error,
            pending_stock_checks,
            last_error: state.last_error.clone(),
        }
    }

    /// Runs a product import now. Fails with `Busy` if one is in progress.
    pub async fn run_import(&self) -> SiigoResult<ImportReport> {
        self.shared.ensure_running().await?;
        self.shared.import_products().await
    }

    pub async fn run_customer_import(&self) -> SiigoResult<ImportReport> {
        self.shared.ensure_running().await?;
        self.shared.import_customers().await
    }

    pub async fn poll_now(&self) -> SiigoResult<PollReport> {
        self.shared.ensure_running().await?;
        self.poller.poll_now().await
    }

    /// Queues products for a stock check; returns how many were newly queued.
    pub async fn enqueue_stock<I, S>(&self, product_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.queue.enqueue_many(product_ids).await
    }

    pub async fn invoice_order(&self, order_id: &str) -> SiigoResult<OrderWithItems> {
        self.shared.ensure_running().await?;
        let result = self.shared.invoicer.invoice_order(order_id).await;
        if let Err(e) = &result {
            self.shared.state.write().await.last_error = Some(format!("invoice {order_id}: {e}"));
        }
        result
    }

    /// Stops every background task. Safe to call more than once.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.write().await;
            if !state.running {
                return;
            }
            state.running = false;
        }

        info!("Shutting down SIIGO sync agent");

        if let Err(e) = self.poller.shutdown().await {
            warn!(error = %e, "Invoice poller already stopped");
        }
        if let Some(stock) = &self.stock {
            if let Err(e) = stock.shutdown().await {
                warn!(error = %e, "Stock worker already stopped");
            }
        }
        for tx in self.import_shutdown.iter().chain(&self.cleanup_shutdown) {
            let _ = tx.send(()).await;
        }

        info!("SIIGO sync agent stopped");
    }
}
