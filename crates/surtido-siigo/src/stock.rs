//! # Stock Reconciliation
//!
//! Local stock drifts from SIIGO: orders reserve units here while
//! warehouse staff adjust quantities there. Every product touched by an
//! order is queued, and a worker periodically asks SIIGO for the real
//! quantity.
//!
//! ## Queue and Worker
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  order created ──► StockQueue::enqueue(product_id)                     │
//! │                       │   (already pending → no-op)                    │
//! │                       ▼                                                 │
//! │               ┌──────────────────┐                                      │
//! │               │ PendingSet (FIFO │                                      │
//! │               │ + membership set)│                                      │
//! │               └────────┬─────────┘                                      │
//! │                        │ every drain_interval: take batch_size ids     │
//! │                        ▼                                                │
//! │  StockWorker: local product ── no siigo_id ──► skipped                 │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │        GET /v1/products/{siigo_id}                                      │
//! │                 │                                                       │
//! │        quantity differs? ── yes ──► set_stock, log reconcile           │
//! │                 │                                                       │
//! │        failure ──► re-enqueue until max_attempts, then drop + log      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use surtido_core::{SyncAction, SyncLogStatus};
use surtido_db::{Database, NewSyncLogEntry};

use crate::client::SiigoClient;
use crate::config::StockSettings;
use crate::error::{SiigoError, SiigoResult};
use crate::mapping::stock_quantity;

// =============================================================================
// PendingSet
// =============================================================================

/// FIFO queue that holds each id at most once.
#[derive(Debug, Default)]
pub struct PendingSet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` at the back. Returns false if it was already pending.
    pub fn push(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        let id = self.order.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    /// Removes up to `max` ids from the front.
    pub fn drain_batch(&mut self, max: usize) -> Vec<String> {
        let mut batch = Vec::with_capacity(max.min(self.order.len()));
        while batch.len() < max {
            match self.pop() {
                Some(id) => batch.push(id),
                None => break,
            }
        }
        batch
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// =============================================================================
// StockQueue
// =============================================================================

#[derive(Debug, Default)]
struct QueueInner {
    pending: PendingSet,
    attempts: HashMap<String, u32>,
}

/// Shared handle to the pending product ids. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct StockQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl StockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a product for reconciliation. Returns false if already queued.
    pub async fn enqueue(&self, product_id: impl Into<String>) -> bool {
        self.inner.lock().await.pending.push(product_id)
    }

    /// Queues several products; returns how many were newly added.
    pub async fn enqueue_many<I, S>(&self, product_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock().await;
        let mut added = 0;
        for id in product_ids {
            if inner.pending.push(id) {
                added += 1;
            }
        }
        added
    }

    pub async fn take_batch(&self, max: usize) -> Vec<String> {
        self.inner.lock().await.pending.drain_batch(max)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Forgets the failure count of a reconciled product.
    pub async fn record_success(&self, product_id: &str) {
        self.inner.lock().await.attempts.remove(product_id);
    }

    /// Counts a failed attempt. Re-queues the product while attempts remain
    /// and returns whether it was re-queued.
    pub async fn record_failure(&self, product_id: &str, max_attempts: u32) -> bool {
        let mut inner = self.inner.lock().await;
        let attempts = inner.attempts.entry(product_id.to_string()).or_insert(0);
        *attempts += 1;

        if *attempts >= max_attempts {
            inner.attempts.remove(product_id);
            false
        } else {
            inner.pending.push(product_id);
            true
        }
    }
}

// =============================================================================
// StockWorker
// =============================================================================

/// Result of reconciling one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StockOutcome {
    Updated { from: i64, to: i64 },
    Unchanged,
    /// Not linked to SIIGO, or no longer exists locally.
    Skipped,
}

/// Totals for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// Handle for stopping a running worker.
#[derive(Clone)]
pub struct StockWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl StockWorkerHandle {
    pub async fn shutdown(&self) -> SiigoResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SiigoError::ChannelError("Shutdown channel closed".into()))
    }
}

pub struct StockWorker {
    db: Database,
    client: Arc<SiigoClient>,
    queue: StockQueue,
    settings: StockSettings,
}

impl StockWorker {
    pub fn new(db: Database, client: Arc<SiigoClient>, queue: StockQueue, settings: StockSettings) -> Self {
        StockWorker {
            db,
            client,
            queue,
            settings,
        }
    }

    /// Starts the drain loop on the current runtime.
    pub fn spawn(self) -> (StockWorkerHandle, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        (StockWorkerHandle { shutdown_tx }, task)
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            batch_size = self.settings.batch_size,
            drain_interval_secs = self.settings.drain_interval_secs,
            "Stock worker starting"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.drain_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.drain_once().await;
                    if report.checked > 0 {
                        debug!(?report, "Stock drain finished");
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Stock worker shutting down");
                    break;
                }
            }
        }

        info!("Stock worker stopped");
    }

    /// Reconciles one batch from the queue.
    pub async fn drain_once(&self) -> DrainReport {
        let batch = self.queue.take_batch(self.settings.batch_size).await;
        let mut report = DrainReport::default();

        for product_id in batch {
            report.checked += 1;
            match self.reconcile(&product_id).await {
                Ok(StockOutcome::Updated { .. }) => {
                    report.updated += 1;
                    self.queue.record_success(&product_id).await;
                }
                Ok(StockOutcome::Unchanged) => {
                    report.unchanged += 1;
                    self.queue.record_success(&product_id).await;
                }
                Ok(StockOutcome::Skipped) => {
                    report.skipped += 1;
                    self.queue.record_success(&product_id).await;
                }
                Err(e) => {
                    if self
                        .queue
                        .record_failure(&product_id, self.settings.max_attempts)
                        .await
                    {
                        report.requeued += 1;
                        warn!(product_id = %product_id, error = %e, "Stock check failed, will retry");
                    } else {
                        report.dropped += 1;
                        error!(product_id = %product_id, error = %e, "Stock check failed, giving up");
                        self.log(&product_id, None, SyncLogStatus::Error, format!("giving up: {e}"))
                            .await;
                    }
                }
            }
        }

        report
    }

    /// Compares one product's local stock with SIIGO's.
    pub async fn reconcile(&self, product_id: &str) -> SiigoResult<StockOutcome> {
        let products = self.db.products();

        let Some(product) = products.get_by_id(product_id).await? else {
            debug!(product_id, "Queued product no longer exists");
            return Ok(StockOutcome::Skipped);
        };

        let Some(siigo_id) = product.siigo_id.as_deref() else {
            self.log(product_id, None, SyncLogStatus::Skipped, "not linked to SIIGO".into())
                .await;
            return Ok(StockOutcome::Skipped);
        };

        let remote = self.client.get_product(siigo_id).await?;
        let quantity = stock_quantity(&remote).ok_or_else(|| SiigoError::Mapping {
            siigo_id: siigo_id.to_string(),
            reason: "stock quantity out of range".into(),
        })?;

        if quantity == product.current_stock {
            return Ok(StockOutcome::Unchanged);
        }

        products.set_stock(product_id, quantity).await?;
        info!(code = %product.code, from = product.current_stock, to = quantity, "Stock reconciled with SIIGO");
        self.log(
            product_id,
            Some(siigo_id),
            SyncLogStatus::Success,
            format!("stock {} -> {}", product.current_stock, quantity),
        )
        .await;

        Ok(StockOutcome::Updated {
            from: product.current_stock,
            to: quantity,
        })
    }

    async fn log(&self, product_id: &str, siigo_id: Option<&str>, status: SyncLogStatus, message: String) {
        let mut entry = NewSyncLogEntry::new("product", SyncAction::StockReconcile, status)
            .entity_id(product_id)
            .message(message);
        if let Some(id) = siigo_id {
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

    #[test]
    fn test_pending_set_dedups_and_keeps_order() {
        let mut set = PendingSet::new();
        assert!(set.push("a"));
        assert!(set.push("b"));
        assert!(!set.push("a"));
        assert!(set.push("c"));
        assert_eq!(set.len(), 3);

        assert_eq!(set.pop().as_deref(), Some("a"));
        assert!(!set.contains("a"));
        // Popped ids can be queued again
        assert!(set.push("a"));

        assert_eq!(set.drain_batch(2), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(set.drain_batch(10), vec!["a".to_string()]);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_queue_enqueue_many_counts_new_ids() {
        let queue = StockQueue::new();
        assert_eq!(queue.enqueue_many(["p1", "p2", "p1"]).await, 2);
        assert!(!queue.enqueue("p2").await);
        assert_eq!(queue.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_failures_requeue_until_max_attempts() {
        let queue = StockQueue::new();
        queue.enqueue("p1").await;

        assert_eq!(queue.take_batch(10).await, vec!["p1".to_string()]);
        assert!(queue.record_failure("p1", 3).await);
        assert_eq!(queue.take_batch(10).await, vec!["p1".to_string()]);
        assert!(queue.record_failure("p1", 3).await);
        assert_eq!(queue.take_batch(10).await, vec!["p1".to_string()]);
        assert!(!queue.record_failure("p1", 3).await);
        assert_eq!(queue.pending_count().await, 0);

        // Counter was reset when dropped
        queue.enqueue("p1").await;
        queue.take_batch(1).await;
        assert!(queue.record_failure("p1", 3).await);
    }

    #[tokio::test]
    async fn test_success_resets_attempts() {
        let queue = StockQueue::new();
        queue.enqueue("p1").await;
        queue.take_batch(1).await;
        assert!(queue.record_failure("p1", 2).await);
        queue.take_batch(1).await;
        queue.record_success("p1").await;

        queue.enqueue("p1").await;
        queue.take_batch(1).await;
        assert!(queue.record_failure("p1", 2).await);
    }
}
