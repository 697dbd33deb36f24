//! SIIGO sync controls and the sync log.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use surtido_core::SyncLogEntry;
use surtido_siigo::{ImportReport, PollReport, SyncStatus};

use super::clamp_limit;
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/sync/products/import`
pub async fn import_products(State(state): State<AppState>) -> Result<Json<ImportReport>, ApiError> {
    Ok(Json(state.sync()?.run_import().await?))
}

/// `POST /api/sync/customers/import`
pub async fn import_customers(State(state): State<AppState>) -> Result<Json<ImportReport>, ApiError> {
    Ok(Json(state.sync()?.run_customer_import().await?))
}

/// `POST /api/sync/invoices/poll`
pub async fn poll_invoices(State(state): State<AppState>) -> Result<Json<PollReport>, ApiError> {
    Ok(Json(state.sync()?.poll_now().await?))
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub product_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StockQueued {
    pub queued: usize,
    pub pending: usize,
}

/// `POST /api/sync/stock`: queues products for a stock check.
pub async fn enqueue_stock(
    State(state): State<AppState>,
    Json(body): Json<StockRequest>,
) -> Result<Json<StockQueued>, ApiError> {
    if body.product_ids.is_empty() {
        return Err(ApiError::validation("product_ids must not be empty"));
    }

    let sync = state.sync()?;
    let queued = sync.enqueue_stock(body.product_ids).await;
    let pending = sync.status().await.pending_stock_checks;
    Ok(Json(StockQueued { queued, pending }))
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub enabled: bool,
    #[serde(flatten)]
    pub status: Option<SyncStatus>,
}

/// `GET /api/sync/status`
pub async fn status(State(state): State<AppState>) -> Json<StatusView> {
    let status = match &state.sync {
        Some(sync) => Some(sync.status().await),
        None => None,
    };
    Json(StatusView {
        enabled: status.is_some(),
        status,
    })
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<u32>,
}

/// `GET /api/sync/log?entity_type=&entity_id=&limit=`
pub async fn log(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<Vec<SyncLogEntry>>, ApiError> {
    let limit = clamp_limit(params.limit);
    let sync_log = state.db.sync_log();

    let entries = match (params.entity_type.as_deref(), params.entity_id.as_deref()) {
        (Some(entity_type), Some(entity_id)) => {
            sync_log.for_entity(entity_type, entity_id, limit).await?
        }
        (None, None) => sync_log.recent(limit).await?,
        _ => {
            return Err(ApiError::validation(
                "entity_type and entity_id must be given together",
            ))
        }
    };
    Ok(Json(entries))
}
