//! In-process fake of the SIIGO API for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use surtido_db::{Database, DbConfig};
use surtido_siigo::config::InvoiceSettings;
use surtido_siigo::SiigoConfig;

#[derive(Default)]
pub struct FakeState {
    pub products: Mutex<Vec<Value>>,
    pub customers: Mutex<Vec<Value>>,
    pub invoices: Mutex<Vec<Value>>,
    /// Bodies received by `POST /v1/invoices`.
    pub created: Mutex<Vec<Value>>,
    /// `updated_start` of every invoice list call.
    pub invoice_queries: Mutex<Vec<String>>,
    /// Status codes returned, in order, by the next resource requests.
    pub inject: Mutex<VecDeque<u16>>,
    /// Product pages that always answer 500.
    pub broken_pages: Mutex<HashSet<u32>>,
    pub token: Mutex<String>,
    /// `expires_in` handed out by `/auth`; 0 means the usual 24 hours.
    pub token_lifetime: AtomicU64,
    /// Milliseconds `POST /v1/invoices` waits before answering.
    pub create_delay_ms: AtomicU64,
    pub auth_calls: AtomicUsize,
    pub requests: AtomicUsize,
}

impl FakeState {
    pub fn inject(&self, statuses: &[u16]) {
        self.inject.lock().unwrap().extend(statuses.iter().copied());
    }

    /// Makes the current token invalid so the next request gets a 401.
    pub fn revoke_token(&self) {
        *self.token.lock().unwrap() = "revoked".into();
    }

    pub fn set_token_lifetime(&self, secs: u64) {
        self.token_lifetime.store(secs, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, ms: u64) {
        self.create_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn set_invoice(&self, invoice: Value) {
        let mut invoices = self.invoices.lock().unwrap();
        invoices.retain(|i| i["id"] != invoice["id"]);
        invoices.push(invoice);
    }

    pub fn invoice(&self, id: &str) -> Option<Value> {
        self.invoices
            .lock()
            .unwrap()
            .iter()
            .find(|i| i["id"] == id)
            .cloned()
    }
}

pub struct FakeSiigo {
    pub url: String,
    pub state: Arc<FakeState>,
}

impl FakeSiigo {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());

        let app = Router::new()
            .route("/auth", post(auth))
            .route("/v1/products", get(list_products))
            .route("/v1/products/{id}", get(get_product))
            .route("/v1/customers", get(list_customers))
            .route("/v1/invoices", get(list_invoices).post(create_invoice))
            .route("/v1/invoices/{id}", get(get_invoice))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FakeSiigo {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Client settings pointed at this server: no request delay, short backoff.
    pub fn config(&self) -> SiigoConfig {
        let mut config = SiigoConfig::default();
        config.api.base_url = self.url.clone();
        config.api.username = "api@distribuidora.co".into();
        config.api.access_key = "access-key".into();
        config.api.request_delay_ms = 0;
        config.api.timeout_secs = 5;
        config.api.max_retries = 3;
        config.api.initial_backoff_ms = 10;
        config.api.max_backoff_secs = 1;
        config.invoice = InvoiceSettings {
            document_id: 24446,
            seller_id: 629,
            payment_method_id: 5636,
            tax_id: Some(13156),
            due_days: 30,
        };
        config.import.page_size = 2;
        config.poller.page_size = 2;
        config
    }
}

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn product_json(id: &str, code: &str, name: &str, price: f64, stock: i64) -> Value {
    json!({
        "id": id,
        "code": code,
        "name": name,
        "description": "",
        "account_group": { "id": 1253, "name": "Abarrotes" },
        "stock_control": true,
        "active": true,
        "taxes": [{ "id": 13156, "name": "IVA 19%", "type": "IVA", "percentage": 19 }],
        "prices": [{
            "currency_code": "COP",
            "price_list": [{ "position": 1, "name": "Precio de venta 1", "value": price }]
        }],
        "available_quantity": stock
    })
}

pub fn customer_json(id: &str, identification: &str, name: &str) -> Value {
    json!({
        "id": id,
        "identification": identification,
        "check_digit": "7",
        "name": [name],
        "commercial_name": name,
        "active": true,
        "phones": [{ "indicative": "57", "number": "3001234567" }],
        "contacts": [{ "first_name": "Ana", "last_name": "Gómez", "email": "compras@example.co" }]
    })
}

// =============================================================================
// Handlers
// =============================================================================

async fn auth(State(state): State<Arc<FakeState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get("Partner-Id").is_none() {
        return error(StatusCode::BAD_REQUEST, "Partner-Id header missing");
    }
    if body["username"].as_str().unwrap_or_default().is_empty() {
        return error(StatusCode::UNAUTHORIZED, "invalid credentials");
    }

    let n = state.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("token-{n}");
    *state.token.lock().unwrap() = token.clone();
    let expires_in = match state.token_lifetime.load(Ordering::SeqCst) {
        0 => 86_400,
        secs => secs,
    };

    Json(json!({
        "access_token": token,
        "expires_in": expires_in,
        "token_type": "Bearer",
        "scope": "WebApi offline_access"
    }))
    .into_response()
}

/// Auth and fault injection shared by every resource endpoint.
fn gate(state: &FakeState, headers: &HeaderMap) -> Option<Response> {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Bearer {}", state.token.lock().unwrap());
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected {
        return Some(error(StatusCode::UNAUTHORIZED, "invalid token"));
    }

    let injected = state.inject.lock().unwrap().pop_front()?;
    let status = StatusCode::from_u16(injected).unwrap();
    let mut response = error(status, "injected failure");
    if status == StatusCode::TOO_MANY_REQUESTS {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, "0".parse().unwrap());
    }
    Some(response)
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "Errors": [{ "Code": "fake_error", "Message": message }],
            "Status": status.as_u16()
        })),
    )
        .into_response()
}

fn paginate(items: &[Value], query: &HashMap<String, String>) -> Response {
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let size: usize = query
        .get("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(25);

    let results: Vec<Value> = items
        .iter()
        .skip((page - 1) * size)
        .take(size)
        .cloned()
        .collect();

    Json(json!({
        "pagination": { "page": page, "page_size": size, "total_results": items.len() },
        "results": results
    }))
    .into_response()
}

async fn list_products(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    if state.broken_pages.lock().unwrap().contains(&page) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "page unavailable");
    }
    let products = state.products.lock().unwrap().clone();
    paginate(&products, &query)
}

async fn get_product(State(state): State<Arc<FakeState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    let found = state
        .products
        .lock()
        .unwrap()
        .iter()
        .find(|p| p["id"] == id.as_str())
        .cloned();
    match found {
        Some(product) => Json(product).into_response(),
        None => error(StatusCode::NOT_FOUND, "product not found"),
    }
}

async fn list_customers(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    let customers = state.customers.lock().unwrap().clone();
    paginate(&customers, &query)
}

async fn list_invoices(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    if let Some(since) = query.get("updated_start") {
        state.invoice_queries.lock().unwrap().push(since.clone());
    }
    let invoices = state.invoices.lock().unwrap().clone();
    paginate(&invoices, &query)
}

async fn get_invoice(State(state): State<Arc<FakeState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    match state.invoice(&id) {
        Some(invoice) => Json(invoice).into_response(),
        None => error(StatusCode::NOT_FOUND, "invoice not found"),
    }
}

async fn create_invoice(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }

    let delay = state.create_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    // SIIGO only accepts numeric amounts
    let Some(total) = body["payments"][0]["value"].as_f64() else {
        return error(StatusCode::BAD_REQUEST, "payments.value must be a number");
    };

    let mut created = state.created.lock().unwrap();
    created.push(body.clone());
    let n = 1000 + created.len();

    let invoice = json!({
        "id": format!("inv-{n}"),
        "name": format!("FV-1-{n}"),
        "number": n,
        "date": body["date"],
        "customer": body["customer"],
        "total": total,
        "balance": total,
        "stamp": { "status": "Draft" },
        "annulled": false
    });
    drop(created);
    state.set_invoice(invoice.clone());

    (StatusCode::CREATED, Json(invoice)).into_response()
}
