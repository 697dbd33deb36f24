//! # SIIGO Configuration
//!
//! Connection credentials and the schedules of the background jobs.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SIIGO_USERNAME=api@distribuidora.co                                │
//! │     SIIGO_ACCESS_KEY=...                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/surtido/siigo.toml (Linux)                               │
//! │     ~/Library/Application Support/co.surtido.surtido/siigo.toml       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [api]
//! base_url = "https://api.siigo.com"
//! username = "api@distribuidora.co"
//! access_key = "..."
//! partner_id = "surtido"
//! request_delay_ms = 250
//!
//! [invoice]
//! document_id = 24446
//! seller_id = 629
//! payment_method_id = 5636
//! tax_id = 13156
//!
//! [poller]
//! interval_secs = 300
//! overlap_secs = 600
//!
//! [stock]
//! batch_size = 20
//! drain_interval_secs = 30
//! max_attempts = 3
//!
//! [import]
//! interval_secs = 0   # 0 = only on demand
//! deactivate_missing = false
//!
//! [log]
//! retention_days = 30   # 0 = keep forever
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SiigoError, SiigoResult};

/// Largest page SIIGO accepts on list endpoints.
pub const MAX_PAGE_SIZE: u32 = 100;

// =============================================================================
// API Connection
// =============================================================================

/// How to reach and authenticate against SIIGO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub access_key: String,

    /// Sent as the `Partner-Id` header on every call.
    #[serde(default = "default_partner_id")]
    pub partner_id: String,

    /// Minimum gap between the starts of two consecutive requests.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_base_url() -> String {
    "https://api.siigo.com".to_string()
}
fn default_partner_id() -> String {
    "surtido".to_string()
}
fn default_request_delay() -> u64 {
    250
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            username: String::new(),
            access_key: String::new(),
            partner_id: default_partner_id(),
            request_delay_ms: default_request_delay(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl ApiSettings {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Invoicing Defaults
// =============================================================================

/// SIIGO ids used when creating invoices. They come from the company's
/// SIIGO account (document types, users, payment types, taxes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceSettings {
    /// Invoice document type (`document.id`).
    #[serde(default)]
    pub document_id: i64,

    /// SIIGO user recorded as the seller.
    #[serde(default)]
    pub seller_id: i64,

    /// Payment type used for the single payment line.
    #[serde(default)]
    pub payment_method_id: i64,

    /// Tax attached to items with a non-zero rate. `None` sends items
    /// without taxes.
    #[serde(default)]
    pub tax_id: Option<i64>,

    /// Days until the payment is due (credit sales).
    #[serde(default)]
    pub due_days: u32,
}

impl InvoiceSettings {
    /// Whether invoices can be created at all.
    pub fn is_configured(&self) -> bool {
        self.document_id > 0 && self.seller_id > 0 && self.payment_method_id > 0
    }
}

// =============================================================================
// Background Jobs
// =============================================================================

/// Invoice-update poller schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// How far before the stored cursor each poll starts, so invoices
    /// updated while the previous poll was running are seen again.
    #[serde(default = "default_overlap")]
    pub overlap_secs: u64,

    /// Window used when no cursor has been stored yet.
    #[serde(default = "default_initial_lookback")]
    pub initial_lookback_hours: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    300
}
fn default_overlap() -> u64 {
    600
}
fn default_initial_lookback() -> u64 {
    24
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

impl Default for PollerSettings {
    fn default() -> Self {
        PollerSettings {
            enabled: true,
            interval_secs: default_poll_interval(),
            overlap_secs: default_overlap(),
            initial_lookback_hours: default_initial_lookback(),
            page_size: default_page_size(),
        }
    }
}

/// Stock reconciliation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Products checked per drain.
    #[serde(default = "default_stock_batch")]
    pub batch_size: usize,

    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Attempts per product before it is dropped from the queue.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_stock_batch() -> usize {
    20
}
fn default_drain_interval() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for StockSettings {
    fn default() -> Self {
        StockSettings {
            enabled: true,
            batch_size: default_stock_batch(),
            drain_interval_secs: default_drain_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Catalog and customer import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Periodic product import. 0 = only on demand.
    #[serde(default)]
    pub interval_secs: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Deactivate local products that SIIGO no longer lists.
    #[serde(default)]
    pub deactivate_missing: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            interval_secs: 0,
            page_size: default_page_size(),
            deactivate_missing: false,
        }
    }
}

/// Retention of `siigo_sync_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Entries older than this are deleted. 0 keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    30
}
fn default_cleanup_interval() -> u64 {
    24 * 60 * 60
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

// =============================================================================
// Main SIIGO Configuration
// =============================================================================

/// Complete SIIGO configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub invoice: InvoiceSettings,

    #[serde(default)]
    pub poller: PollerSettings,

    #[serde(default)]
    pub stock: StockSettings,

    #[serde(default)]
    pub import: ImportSettings,

    #[serde(default)]
    pub log: LogSettings,
}

impl SiigoConfig {
    /// Loads configuration from file and environment.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (siigo.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SiigoResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading SIIGO config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "SIIGO config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SiigoResult<()> {
        self.base_url()?;

        if self.api.username.trim().is_empty() {
            return Err(SiigoError::InvalidConfig("api.username is required".into()));
        }
        if self.api.access_key.trim().is_empty() {
            return Err(SiigoError::InvalidConfig("api.access_key is required".into()));
        }
        if self.api.partner_id.trim().is_empty() {
            return Err(SiigoError::InvalidConfig("api.partner_id is required".into()));
        }
        if self.api.timeout_secs == 0 {
            return Err(SiigoError::InvalidConfig(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        for (name, size) in [
            ("poller.page_size", self.poller.page_size),
            ("import.page_size", self.import.page_size),
        ] {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(SiigoError::InvalidConfig(format!(
                    "{name} must be between 1 and {MAX_PAGE_SIZE}"
                )));
            }
        }

        if self.poller.enabled && self.poller.interval_secs == 0 {
            return Err(SiigoError::InvalidConfig(
                "poller.interval_secs must be greater than 0".into(),
            ));
        }
        if self.stock.batch_size == 0 {
            return Err(SiigoError::InvalidConfig(
                "stock.batch_size must be greater than 0".into(),
            ));
        }
        if self.stock.enabled && self.stock.drain_interval_secs == 0 {
            return Err(SiigoError::InvalidConfig(
                "stock.drain_interval_secs must be greater than 0".into(),
            ));
        }
        if self.stock.max_attempts == 0 {
            return Err(SiigoError::InvalidConfig(
                "stock.max_attempts must be greater than 0".into(),
            ));
        }
        if self.log.retention_days > 0 && self.log.cleanup_interval_secs == 0 {
            return Err(SiigoError::InvalidConfig(
                "log.cleanup_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Parses `api.base_url`, which must be http(s).
    pub fn base_url(&self) -> SiigoResult<Url> {
        let url = Url::parse(&self.api.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SiigoError::InvalidUrl(format!(
                "SIIGO base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        Ok(url)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SIIGO_BASE_URL") {
            debug!(url = %url, "Overriding SIIGO base URL from environment");
            self.api.base_url = url;
        }

        if let Ok(username) = std::env::var("SIIGO_USERNAME") {
            self.api.username = username;
        }

        if let Ok(key) = std::env::var("SIIGO_ACCESS_KEY") {
            self.api.access_key = key;
        }

        if let Ok(partner) = std::env::var("SIIGO_PARTNER_ID") {
            self.api.partner_id = partner;
        }

        if let Ok(delay) = std::env::var("SIIGO_REQUEST_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) => self.api.request_delay_ms = ms,
                Err(_) => warn!(value = %delay, "Ignoring invalid SIIGO_REQUEST_DELAY_MS"),
            }
        }

        if let Ok(interval) = std::env::var("SIIGO_POLL_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.poller.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid SIIGO_POLL_INTERVAL_SECS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("co", "surtido", "surtido")
            .map(|dirs| dirs.config_dir().join("siigo.toml"))
    }
}
