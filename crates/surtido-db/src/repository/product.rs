//! # Product Repository
//!
//! Database operations for the catalog.
//!
//! ## Two Writers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  REST API (insert / update)        SIIGO importer (upsert_from_siigo)   │
//! │        │                                   │                            │
//! │        │ siigo_id = NULL                   │ match by siigo_id,         │
//! │        │                                   │ then by code (links local  │
//! │        ▼                                   ▼ products on first import)  │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          products                                │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │        ▲                                                                │
//! │        │ set_stock (stock worker), stock decrement (order create)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::{like_pattern, UpsertOutcome};
use crate::error::{DbError, DbResult};
use surtido_core::Product;

pub(crate) const PRODUCT_COLUMNS: &str = "id, siigo_id, code, name, description, group_name, \
     price_cents, tax_rate_bps, track_inventory, current_stock, is_active, \
     last_synced_at, created_at, updated_at";

/// A product created locally (not yet known to SIIGO).
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub tax_rate_bps: u32,
    #[serde(default = "default_true")]
    pub track_inventory: bool,
    #[serde(default)]
    pub current_stock: i64,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub group_name: Option<String>,
    pub price_cents: Option<i64>,
    pub tax_rate_bps: Option<u32>,
    pub track_inventory: Option<bool>,
    pub current_stock: Option<i64>,
    pub is_active: Option<bool>,
}

/// A product as mapped from SIIGO, ready to be merged into the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpsert {
    pub siigo_id: String,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub group_name: Option<String>,
    pub price_cents: i64,
    pub tax_rate_bps: u32,
    pub track_inventory: bool,
    pub current_stock: i64,
    pub is_active: bool,
}

impl ProductUpsert {
    fn differs_from(&self, existing: &Product) -> bool {
        existing.siigo_id.as_deref() != Some(self.siigo_id.as_str())
            || existing.code != self.code
            || existing.name != self.name
            || existing.description != self.description
            || existing.group_name != self.group_name
            || existing.price_cents != self.price_cents
            || existing.tax_rate_bps != self.tax_rate_bps
            || existing.track_inventory != self.track_inventory
            || existing.current_stock != self.current_stock
            || existing.is_active != self.is_active
    }
}

fn default_true() -> bool {
    true
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Gets a product by its business code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Gets a product by its SIIGO GUID.
    pub async fn get_by_siigo_id(&self, siigo_id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE siigo_id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(siigo_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Searches by code or name (case-insensitive substring).
    ///
    /// An empty query lists products ordered by name.
    pub async fn search(&self, query: &str, active_only: bool, limit: u32) -> DbResult<Vec<Product>> {
        let query = query.trim();
        debug!(query = %query, active_only, limit, "Searching products");

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE (?1 = '' OR code LIKE ?2 ESCAPE '\\' OR name LIKE ?2 ESCAPE '\\')
               AND (?3 = 0 OR is_active = 1)
             ORDER BY name
             LIMIT ?4"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(query)
            .bind(like_pattern(query))
            .bind(active_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = products.len(), "Search returned products");
        Ok(products)
    }

    /// Inserts a locally created product.
    pub async fn insert(&self, new: &NewProduct) -> DbResult<Product> {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            siigo_id: None,
            code: new.code.trim().to_string(),
            name: new.name.trim().to_string(),
            description: new.description.clone(),
            group_name: new.group_name.clone(),
            price_cents: new.price_cents,
            tax_rate_bps: new.tax_rate_bps,
            track_inventory: new.track_inventory,
            current_stock: new.current_stock,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };

        debug!(code = %product.code, "Inserting product");

        self.insert_row(&product).await.map_err(|e| match e {
            DbError::UniqueViolation { .. } => DbError::duplicate("code", &product.code),
            other => other,
        })?;

        Ok(product)
    }

    async fn insert_row(&self, p: &Product) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, siigo_id, code, name, description, group_name,
                price_cents, tax_rate_bps, track_inventory, current_stock, is_active,
                last_synced_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&p.id)
        .bind(&p.siigo_id)
        .bind(&p.code)
        .bind(&p.name)
        .bind(&p.description)
        .bind(&p.group_name)
        .bind(p.price_cents)
        .bind(p.tax_rate_bps)
        .bind(p.track_inventory)
        .bind(p.current_stock)
        .bind(p.is_active)
        .bind(p.last_synced_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies a partial update and returns the updated product.
    pub async fn update(&self, id: &str, changes: &ProductUpdate) -> DbResult<Product> {
        let mut product = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;

        if let Some(name) = &changes.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = &changes.description {
            product.description = Some(description.clone());
        }
        if let Some(group_name) = &changes.group_name {
            product.group_name = Some(group_name.clone());
        }
        if let Some(price) = changes.price_cents {
            product.price_cents = price;
        }
        if let Some(bps) = changes.tax_rate_bps {
            product.tax_rate_bps = bps;
        }
        if let Some(track) = changes.track_inventory {
            product.track_inventory = track;
        }
        if let Some(stock) = changes.current_stock {
            product.current_stock = stock;
        }
        if let Some(active) = changes.is_active {
            product.is_active = active;
        }
        product.updated_at = Utc::now();

        self.write_fields(&product).await?;
        debug!(id = %product.id, "Product updated");
        Ok(product)
    }

    async fn write_fields(&self, p: &Product) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE products SET
                siigo_id = ?2, code = ?3, name = ?4, description = ?5, group_name = ?6,
                price_cents = ?7, tax_rate_bps = ?8, track_inventory = ?9,
                current_stock = ?10, is_active = ?11, last_synced_at = ?12, updated_at = ?13
            WHERE id = ?1
            "#,
        )
        .bind(&p.id)
        .bind(&p.siigo_id)
        .bind(&p.code)
        .bind(&p.name)
        .bind(&p.description)
        .bind(&p.group_name)
        .bind(p.price_cents)
        .bind(p.tax_rate_bps)
        .bind(p.track_inventory)
        .bind(p.current_stock)
        .bind(p.is_active)
        .bind(p.last_synced_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merges a SIIGO product into the catalog.
    ///
    /// ## Matching
    /// 1. A row with the same `siigo_id`
    /// 2. Otherwise a row with the same `code` (links a locally created product)
    /// 3. Otherwise insert
    ///
    /// Returns the local id and what happened to the row.
    pub async fn upsert_from_siigo(&self, row: &ProductUpsert) -> DbResult<(String, UpsertOutcome)> {
        let now = Utc::now();

        let existing = match self.get_by_siigo_id(&row.siigo_id).await? {
            Some(p) => Some(p),
            None => self.get_by_code(&row.code).await?,
        };

        let Some(mut product) = existing else {
            let product = Product {
                id: Uuid::new_v4().to_string(),
                siigo_id: Some(row.siigo_id.clone()),
                code: row.code.clone(),
                name: row.name.clone(),
                description: row.description.clone(),
                group_name: row.group_name.clone(),
                price_cents: row.price_cents,
                tax_rate_bps: row.tax_rate_bps,
                track_inventory: row.track_inventory,
                current_stock: row.current_stock,
                is_active: row.is_active,
                last_synced_at: Some(now),
                created_at: now,
                updated_at: now,
            };
            self.insert_row(&product).await?;
            debug!(code = %row.code, siigo_id = %row.siigo_id, "Imported new product");
            return Ok((product.id, UpsertOutcome::Inserted));
        };

        let outcome = if row.differs_from(&product) {
            product.siigo_id = Some(row.siigo_id.clone());
            product.code = row.code.clone();
            product.name = row.name.clone();
            product.description = row.description.clone();
            product.group_name = row.group_name.clone();
            product.price_cents = row.price_cents;
            product.tax_rate_bps = row.tax_rate_bps;
            product.track_inventory = row.track_inventory;
            product.current_stock = row.current_stock;
            product.is_active = row.is_active;
            product.updated_at = now;
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Unchanged
        };
        product.last_synced_at = Some(now);

        self.write_fields(&product).await?;
        Ok((product.id, outcome))
    }

    /// Sets the absolute stock level.
    pub async fn set_stock(&self, id: &str, quantity: i64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE products SET current_stock = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Deactivates active SIIGO-linked products whose `siigo_id` is not in
    /// `seen`. Locally created products (no `siigo_id`) are never touched.
    ///
    /// Returns the number of deactivated products.
    pub async fn deactivate_missing_siigo(&self, seen: &HashSet<String>) -> DbResult<u64> {
        let linked: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, siigo_id FROM products WHERE is_active = 1 AND siigo_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut deactivated = 0;
        for (id, siigo_id) in linked.iter().filter(|(_, s)| !seen.contains(s)) {
            sqlx::query("UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            debug!(id = %id, siigo_id = %siigo_id, "Deactivated product missing from SIIGO");
            deactivated += 1;
        }
        tx.commit().await?;

        if deactivated > 0 {
            info!(deactivated, "Deactivated products no longer in SIIGO");
        }
        Ok(deactivated)
    }

    /// Counts all products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn setup_test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn new_product(code: &str, name: &str) -> NewProduct {
        NewProduct {
            code: code.to_string(),
            name: name.to_string(),
            description: None,
            group_name: Some("Galletería".to_string()),
            price_cents: 459_900,
            tax_rate_bps: 1900,
            track_inventory: true,
            current_stock: 40,
        }
    }

    fn siigo_row(siigo_id: &str, code: &str) -> ProductUpsert {
        ProductUpsert {
            siigo_id: siigo_id.to_string(),
            code: code.to_string(),
            name: "Galletas de avena 500g".to_string(),
            description: None,
            group_name: Some("Galletería".to_string()),
            price_cents: 459_900,
            tax_rate_bps: 1900,
            track_inventory: true,
            current_stock: 40,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = setup_test_db().await;
        let repo = db.products();

        let created = repo.insert(&new_product("GAL-500", "Galletas")).await.unwrap();
        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.code, "GAL-500");
        assert_eq!(fetched.siigo_id, None);
        assert_eq!(repo.get_by_code("GAL-500").await.unwrap().unwrap().id, created.id);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_code() {
        let db = setup_test_db().await;
        let repo = db.products();

        repo.insert(&new_product("GAL-500", "Galletas")).await.unwrap();
        let err = repo.insert(&new_product("GAL-500", "Otra")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "code"));
    }

    #[tokio::test]
    async fn test_search_by_code_and_name() {
        let db = setup_test_db().await;
        let repo = db.products();

        repo.insert(&new_product("GAL-500", "Galletas de avena")).await.unwrap();
        repo.insert(&new_product("ACE-1L", "Aceite de girasol")).await.unwrap();
        let inactive = repo.insert(&new_product("GAL-250", "Galletas mini")).await.unwrap();
        repo.update(
            &inactive.id,
            &ProductUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.search("galletas", true, 10).await.unwrap().len(), 1);
        assert_eq!(repo.search("galletas", false, 10).await.unwrap().len(), 2);
        assert_eq!(repo.search("ACE", true, 10).await.unwrap().len(), 1);
        assert_eq!(repo.search("", false, 10).await.unwrap().len(), 3);
        assert_eq!(repo.search("%", false, 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let db = setup_test_db().await;
        let repo = db.products();
        let created = repo.insert(&new_product("GAL-500", "Galletas")).await.unwrap();

        let updated = repo
            .update(
                &created.id,
                &ProductUpdate {
                    price_cents: Some(499_900),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.price_cents, 499_900);
        assert_eq!(updated.name, "Galletas");

        let err = repo.update("missing", &ProductUpdate::default()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_upsert_insert_update_unchanged() {
        let db = setup_test_db().await;
        let repo = db.products();
        let mut row = siigo_row("sg-1", "GAL-500");

        let (id, outcome) = repo.upsert_from_siigo(&row).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let (same_id, outcome) = repo.upsert_from_siigo(&row).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(same_id, id);

        row.price_cents = 479_900;
        let (_, outcome) = repo.upsert_from_siigo(&row).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let stored = repo.get_by_siigo_id("sg-1").await.unwrap().unwrap();
        assert_eq!(stored.price_cents, 479_900);
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_upsert_links_local_product_by_code() {
        let db = setup_test_db().await;
        let repo = db.products();
        let local = repo.insert(&new_product("GAL-500", "Galletas")).await.unwrap();

        let (id, outcome) = repo.upsert_from_siigo(&siigo_row("sg-9", "GAL-500")).await.unwrap();
        assert_eq!(id, local.id);
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(
            repo.get_by_id(&local.id).await.unwrap().unwrap().siigo_id.as_deref(),
            Some("sg-9")
        );
    }

    #[tokio::test]
    async fn test_set_stock() {
        let db = setup_test_db().await;
        let repo = db.products();
        let p = repo.insert(&new_product("GAL-500", "Galletas")).await.unwrap();

        repo.set_stock(&p.id, 7).await.unwrap();
        assert_eq!(repo.get_by_id(&p.id).await.unwrap().unwrap().current_stock, 7);
        assert!(repo.set_stock("missing", 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deactivate_missing_siigo() {
        let db = setup_test_db().await;
        let repo = db.products();
        repo.upsert_from_siigo(&siigo_row("sg-1", "A")).await.unwrap();
        repo.upsert_from_siigo(&siigo_row("sg-2", "B")).await.unwrap();
        let local = repo.insert(&new_product("LOCAL", "Solo local")).await.unwrap();

        let seen: HashSet<String> = ["sg-1".to_string()].into_iter().collect();
        assert_eq!(repo.deactivate_missing_siigo(&seen).await.unwrap(), 1);

        assert!(!repo.get_by_siigo_id("sg-2").await.unwrap().unwrap().is_active);
        assert!(repo.get_by_siigo_id("sg-1").await.unwrap().unwrap().is_active);
        assert!(repo.get_by_id(&local.id).await.unwrap().unwrap().is_active);
    }
}
