//! # surtido-siigo: SIIGO Integration for Surtido
//!
//! Everything that talks to the SIIGO accounting API: authentication, a
//! rate-limited retrying HTTP client, catalog and customer import, the
//! invoice-update poller, invoicing and stock reconciliation.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SIIGO Integration                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncAgent (orchestrator)                       │  │
//! │  │  Spawned once by the API server, controlled via SyncAgentHandle  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │   ┌──────────────┬────────────┼──────────────┬──────────────┐          │
//! │   ▼              ▼            ▼              ▼              ▼           │
//! │ Importer   InvoicePoller  InvoiceService  StockWorker   (status)       │
//! │   │              │            │              │                          │
//! │   └──────────────┴─────┬──────┴──────────────┘                          │
//! │                        ▼                                                │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ SiigoClient: bearer token (SiigoAuth), Partner-Id, request delay,│  │
//! │  │ exponential backoff on 429/5xx/timeouts, one re-auth on 401      │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                        │                                                │
//! │                        ▼                                                │
//! │                 https://api.siigo.com                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` and its handle
//! - [`auth`] - Access token cache
//! - [`client`] - HTTP client with rate limiting and retries
//! - [`config`] - `siigo.toml` plus environment overrides
//! - [`error`] - `SiigoError`
//! - [`importer`] - Paginated product and customer import
//! - [`invoicing`] - Invoice creation for confirmed orders
//! - [`mapping`] - Pure SIIGO → local conversions
//! - [`model`] - SIIGO wire types
//! - [`poller`] - Invoice-update poller
//! - [`stock`] - Stock reconciliation queue and worker
//!
//! ## Usage
//!
//! ```rust,ignore
//! use surtido_siigo::{SiigoConfig, SyncAgent};
//!
//! let config = SiigoConfig::load(None)?;
//! let agent = SyncAgent::new(config, db.clone())?.start();
//!
//! let report = agent.run_import().await?;
//! println!("{}", report.summary());
//! ```

pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod importer;
pub mod invoicing;
pub mod mapping;
pub mod model;
pub mod poller;
pub mod stock;

pub use agent::{SyncAgent, SyncAgentHandle, SyncStatus};
pub use auth::{SiigoAuth, TokenInfo};
pub use client::SiigoClient;
pub use config::SiigoConfig;
pub use error::{SiigoError, SiigoResult};
pub use importer::{ImportReport, Importer};
pub use invoicing::{build_invoice_request, InvoiceService};
pub use poller::{InvoicePoller, InvoicePollerHandle, PollReport};
pub use stock::{DrainReport, StockOutcome, StockQueue, StockWorker};
