//! # Product Endpoints
//!
//! Local catalog CRUD. Products imported from SIIGO are edited here too;
//! the next import overwrites whatever SIIGO owns (price, name, stock).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use surtido_core::validation::{
    validate_price_cents, validate_product_code, validate_product_name, validate_search_query,
    validate_tax_rate_bps,
};
use surtido_core::Product;
use surtido_db::{NewProduct, ProductUpdate};

use super::clamp_limit;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_active_only")]
    pub active_only: bool,
    pub limit: Option<u32>,
}

fn default_active_only() -> bool {
    true
}

/// `GET /api/products?q=&active_only=&limit=`
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let query = validate_search_query(&params.q)?;
    let products = state
        .db
        .products()
        .search(&query, params.active_only, clamp_limit(params.limit))
        .await?;
    Ok(Json(products))
}

/// `POST /api/products`
pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    validate_product_code(&new.code)?;
    validate_product_name(&new.name)?;
    validate_price_cents(new.price_cents)?;
    validate_tax_rate_bps(new.tax_rate_bps)?;
    if new.current_stock < 0 {
        return Err(ApiError::validation("current_stock cannot be negative"));
    }

    let product = state.db.products().insert(&new).await?;
    info!(code = %product.code, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// `GET /api/products/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    state
        .db
        .products()
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Product", &id))
}

/// `PUT /api/products/{id}`: partial update, absent fields are kept.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<ProductUpdate>,
) -> Result<Json<Product>, ApiError> {
    if let Some(name) = &changes.name {
        validate_product_name(name)?;
    }
    if let Some(price) = changes.price_cents {
        validate_price_cents(price)?;
    }
    if let Some(bps) = changes.tax_rate_bps {
        validate_tax_rate_bps(bps)?;
    }
    if changes.current_stock.is_some_and(|stock| stock < 0) {
        return Err(ApiError::validation("current_stock cannot be negative"));
    }

    let product = state.db.products().update(&id, &changes).await?;
    Ok(Json(product))
}
