//! Customer lookup and credit lines. Customers themselves come from the
//! SIIGO customer import.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use surtido_core::validation::{validate_credit_limit_cents, validate_search_query};
use surtido_core::{Customer, CustomerCredit};

use super::clamp_limit;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

/// Credit line plus the derived remaining amount.
#[derive(Debug, Serialize)]
pub struct CreditView {
    #[serde(flatten)]
    pub credit: CustomerCredit,
    pub available_cents: i64,
    pub cash_only: bool,
}

impl From<CustomerCredit> for CreditView {
    fn from(credit: CustomerCredit) -> Self {
        CreditView {
            available_cents: credit.available().cents(),
            cash_only: credit.is_cash_only(),
            credit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetCredit {
    pub credit_limit_cents: i64,
}

/// `GET /api/customers?q=&limit=`
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    let query = validate_search_query(&params.q)?;
    let customers = state
        .db
        .customers()
        .search(&query, clamp_limit(params.limit))
        .await?;
    Ok(Json(customers))
}

/// `GET /api/customers/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Customer>, ApiError> {
    state
        .db
        .customers()
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Customer", &id))
}

/// `GET /api/customers/{id}/credit`
pub async fn get_credit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CreditView>, ApiError> {
    let credit = state.db.customers().get_credit(&id).await?;
    Ok(Json(credit.into()))
}

/// `PUT /api/customers/{id}/credit`: sets the limit; 0 makes the customer
/// cash-only.
pub async fn set_credit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetCredit>,
) -> Result<Json<CreditView>, ApiError> {
    validate_credit_limit_cents(body.credit_limit_cents)?;
    let credit = state
        .db
        .customers()
        .set_credit_limit(&id, body.credit_limit_cents)
        .await?;
    info!(customer_id = %id, limit_cents = credit.credit_limit_cents, "Credit limit updated");
    Ok(Json(credit.into()))
}
