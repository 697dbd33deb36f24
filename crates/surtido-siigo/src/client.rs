//! # SIIGO HTTP Client
//!
//! One client per SIIGO account, shared by every background task.
//!
//! ## Request Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  list_products(page, size)                                              │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ┌──────────────┐  wait until request_delay has passed since the       │
//! │  │ Rate limiter │  previous request started (all tasks share it)       │
//! │  └──────┬───────┘                                                      │
//! │         ▼                                                               │
//! │  ┌──────────────┐  Authorization: Bearer <token>                       │
//! │  │  send once   │  Partner-Id: <partner>                               │
//! │  └──────┬───────┘                                                      │
//! │         │                                                               │
//! │   2xx ──┼──► decode JSON                                                │
//! │   401 ──┼──► invalidate token, send once more (only once)              │
//! │   429 ──┼──► wait max(backoff, Retry-After), retry ┐                   │
//! │   5xx ──┼──► wait backoff, retry                   ├ up to max_retries │
//! │  net  ──┼──► wait backoff, retry                   ┘                   │
//! │   4xx ──┴──► SiigoError::Api (no retry)                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::auth::SiigoAuth;
use crate::config::{ApiSettings, SiigoConfig};
use crate::error::{SiigoError, SiigoResult};
use crate::model::{
    ErrorBody, InvoiceRequest, Paginated, SiigoCustomer, SiigoInvoice, SiigoProduct,
};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

// =============================================================================
// Rate Limiter
// =============================================================================

/// Spaces out request starts by at least `delay`.
#[derive(Debug)]
struct RateLimiter {
    delay: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(delay: Duration) -> Self {
        RateLimiter {
            delay,
            last_start: Mutex::new(None),
        }
    }

    /// Waits for this caller's turn. The lock is held while sleeping so
    /// concurrent callers queue up behind each other.
    async fn acquire(&self) {
        let mut last = self.last_start.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    fn from_settings(api: &ApiSettings) -> Self {
        RetryPolicy {
            max_retries: api.max_retries,
            initial_backoff: api.initial_backoff(),
            max_backoff: api.max_backoff(),
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // attempts are bounded by max_retries
            ..Default::default()
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// SIIGO REST client.
pub struct SiigoClient {
    http: reqwest::Client,
    base_url: Url,
    partner_id: String,
    auth: SiigoAuth,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl SiigoClient {
    /// Builds a client from a validated configuration.
    pub fn new(config: &SiigoConfig) -> SiigoResult<Self> {
        let api = &config.api;
        let base_url = with_trailing_slash(config.base_url()?);

        let http = reqwest::Client::builder()
            .timeout(api.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("surtido/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SiigoError::InvalidConfig(format!("HTTP client: {e}")))?;

        let auth = SiigoAuth::new(
            http.clone(),
            &base_url,
            &api.username,
            &api.access_key,
            &api.partner_id,
        )?;

        Ok(SiigoClient {
            http,
            base_url,
            partner_id: api.partner_id.clone(),
            auth,
            limiter: RateLimiter::new(api.request_delay()),
            retry: RetryPolicy::from_settings(api),
        })
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub async fn list_products(&self, page: u32, page_size: u32) -> SiigoResult<Paginated<SiigoProduct>> {
        self.get("v1/products", &page_query(page, page_size)).await
    }

    pub async fn get_product(&self, id: &str) -> SiigoResult<SiigoProduct> {
        self.get(&format!("v1/products/{id}"), &[]).await
    }

    pub async fn list_customers(&self, page: u32, page_size: u32) -> SiigoResult<Paginated<SiigoCustomer>> {
        self.get("v1/customers", &page_query(page, page_size)).await
    }

    /// Invoices updated at or after `updated_since`.
    pub async fn list_invoices(
        &self,
        updated_since: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> SiigoResult<Paginated<SiigoInvoice>> {
        let mut query = page_query(page, page_size);
        query.push((
            "updated_start",
            updated_since.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        ));
        self.get("v1/invoices", &query).await
    }

    pub async fn get_invoice(&self, id: &str) -> SiigoResult<SiigoInvoice> {
        self.get(&format!("v1/invoices/{id}"), &[]).await
    }

    /// Creates an invoice. Not retried after a server error: SIIGO may have
    /// created the document before failing, and a retry would duplicate it.
    pub async fn create_invoice(&self, request: &InvoiceRequest) -> SiigoResult<SiigoInvoice> {
        self.send(Method::POST, "v1/invoices", &[], Some(request), false)
            .await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> SiigoResult<T> {
        self.send::<(), T>(Method::GET, path, query, None, true).await
    }

    async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
        idempotent: bool,
    ) -> SiigoResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        let mut backoff = self.retry.create_backoff();
        let mut retries = 0u32;
        let mut reauthenticated = false;

        loop {
            let result = self.send_once(method.clone(), &url, query, body).await;

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err {
                SiigoError::Unauthorized if !reauthenticated => {
                    debug!(%url, "SIIGO answered 401, re-authenticating");
                    self.auth.invalidate().await;
                    reauthenticated = true;
                }
                err if err.is_retryable() && retries < self.retry.max_retries => {
                    let connection_level =
                        matches!(err, SiigoError::Connection(_) | SiigoError::RateLimited { .. });
                    if !idempotent && !connection_level {
                        return Err(err);
                    }

                    retries += 1;
                    let wait = backoff
                        .next_backoff()
                        .unwrap_or(self.retry.max_backoff)
                        .max(err.retry_after().unwrap_or_default());

                    warn!(
                        %url,
                        error = %err,
                        attempt = retries,
                        max_retries = self.retry.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "SIIGO request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                err => return Err(err),
            }
        }
    }

    async fn send_once<B, T>(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> SiigoResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.limiter.acquire().await;
        let token = self.auth.get_token().await?;

        let mut request = self
            .http
            .request(method, url.clone())
            .bearer_auth(token)
            .header("Partner-Id", &self.partner_id);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        Err(status_error(status, &text, retry_after))
    }
}

fn page_query(page: u32, page_size: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.to_string()), ("page_size", page_size.to_string())]
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps a non-success response to an error.
fn status_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> SiigoError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.summary())
        .unwrap_or_else(|| truncate(body.trim(), MAX_ERROR_BODY));

    match status {
        StatusCode::UNAUTHORIZED => SiigoError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => SiigoError::RateLimited { retry_after },
        s if s.is_server_error() => SiigoError::Server {
            status: s.as_u16(),
            message,
        },
        s => SiigoError::Api {
            status: s.as_u16(),
            message,
        },
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
