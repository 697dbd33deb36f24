//! # Order Endpoints
//!
//! ## Order Workflow
//! ```text
//! POST /api/orders ──► pending ──PATCH──► confirmed ──POST /invoice──► invoiced
//!        │                                                               │
//!        │ stock reserved, credit used                       PATCH dispatched
//!        │ products queued for a SIIGO stock check                       │
//!        ▼                                                   PATCH delivered
//!   PATCH cancelled (before dispatch) ──► stock and credit released
//! ```
//!
//! `invoiced` is only reachable through the invoice endpoint, which creates
//! the SIIGO document first.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use surtido_core::{Order, OrderStatus};
use surtido_db::{NewOrder, OrderFilter, OrderWithItems};

use super::clamp_limit;
use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

/// `GET /api/orders?status=&customer_id=&limit=`
pub async fn list(
    State(state): State<AppState>,
    Query(mut filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>, ApiError> {
    filter.limit = Some(clamp_limit(filter.limit));
    let orders = state.db.orders().list(&filter).await?;
    Ok(Json(orders))
}

/// `POST /api/orders`: validates lines, stock and credit, persists the
/// order atomically, then queues its products for a stock check.
pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewOrder>,
) -> Result<(StatusCode, Json<OrderWithItems>), ApiError> {
    let order = state.db.orders().create(&new).await?;

    if let Some(sync) = &state.sync {
        let queued = sync
            .enqueue_stock(order.items.iter().map(|item| item.product_id.clone()))
            .await;
        info!(order_number = %order.order.order_number, queued, "Queued stock checks");
    }

    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /api/orders/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>, ApiError> {
    state
        .db
        .orders()
        .get_with_items(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Order", &id))
}

/// `PATCH /api/orders/{id}/status`
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Json<OrderWithItems>, ApiError> {
    if change.status == OrderStatus::Invoiced {
        return Err(ApiError::new(
            ErrorCode::ValidationError,
            format!("Use POST /api/orders/{id}/invoice to invoice an order"),
        ));
    }

    let orders = state.db.orders();
    orders.update_status(&id, change.status).await?;
    let order = orders
        .get_with_items(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Order", &id))?;

    // Released stock should be compared with SIIGO as well
    if change.status == OrderStatus::Cancelled {
        if let Some(sync) = &state.sync {
            sync.enqueue_stock(order.items.iter().map(|item| item.product_id.clone()))
                .await;
        }
    }

    Ok(Json(order))
}

/// `POST /api/orders/{id}/invoice`
pub async fn invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order = state.sync()?.invoice_order(&id).await?;
    Ok(Json(order))
}
