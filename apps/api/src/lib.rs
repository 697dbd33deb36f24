//! # surtido-api: REST Server for Surtido
//!
//! ## Routes
//! ```text
//! GET        /health
//! GET POST   /api/products               search / create
//! GET PUT    /api/products/{id}
//! GET        /api/customers              search
//! GET        /api/customers/{id}
//! GET PUT    /api/customers/{id}/credit
//! GET POST   /api/orders                 list / create
//! GET        /api/orders/{id}
//! PATCH      /api/orders/{id}/status
//! POST       /api/orders/{id}/invoice    create SIIGO invoice
//! POST       /api/sync/products/import
//! POST       /api/sync/customers/import
//! POST       /api/sync/invoices/poll
//! POST       /api/sync/stock
//! GET        /api/sync/status
//! GET        /api/sync/log
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ApiConfig;
pub use error::{ApiError, ErrorCode};
pub use state::AppState;

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    let api: Router<AppState> = Router::new()
        .route(
            "/products",
            get(routes::products::search).post(routes::products::create),
        )
        .route(
            "/products/{id}",
            get(routes::products::get).put(routes::products::update),
        )
        .route("/customers", get(routes::customers::search))
        .route("/customers/{id}", get(routes::customers::get))
        .route(
            "/customers/{id}/credit",
            get(routes::customers::get_credit).put(routes::customers::set_credit),
        )
        .route(
            "/orders",
            get(routes::orders::list).post(routes::orders::create),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/status", patch(routes::orders::update_status))
        .route("/orders/{id}/invoice", post(routes::orders::invoice))
        .route("/sync/products/import", post(routes::sync::import_products))
        .route("/sync/customers/import", post(routes::sync::import_customers))
        .route("/sync/invoices/poll", post(routes::sync::poll_invoices))
        .route("/sync/stock", post(routes::sync::enqueue_stock))
        .route("/sync/status", get(routes::sync::status))
        .route("/sync/log", get(routes::sync::log));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
