//! # surtido-db: Database Layer for Surtido
//!
//! SQLite storage for the catalog, customers, orders and SIIGO sync
//! bookkeeping, accessed through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  REST handler / SIIGO importer / invoice poller / stock worker          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   surtido-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌─────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories   │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ products        │   │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ customers       │   │ 001_init.sql │  │   │
//! │  │   │               │    │ orders          │   │              │  │   │
//! │  │   │               │    │ sync_log        │   │              │  │   │
//! │  │   └───────────────┘    └─────────────────┘   └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL)                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use surtido_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("surtido.db")).await?;
//! let products = db.products().search("galletas", true, 20).await?;
//! ```
//!
//! Queries are built at runtime (`sqlx::query_as::<_, T>`) and decoded through
//! `FromRow` derives on the core types, so building the workspace needs no
//! live database or offline query cache.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::customer::{CustomerRepository, CustomerUpsert};
pub use repository::order::{
    InvoiceLink, InvoicePatch, NewOrder, NewOrderItem, OrderFilter, OrderRepository,
    OrderWithItems,
};
pub use repository::product::{NewProduct, ProductRepository, ProductUpdate, ProductUpsert};
pub use repository::sync_log::{NewSyncLogEntry, SyncLogRepository};
pub use repository::UpsertOutcome;
