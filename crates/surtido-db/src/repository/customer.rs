//! # Customer Repository
//!
//! Customers come from SIIGO's customer import; each one gets a credit line
//! (cash-only until someone sets a limit).

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::{like_pattern, UpsertOutcome};
use crate::error::{DbError, DbResult};
use surtido_core::{Customer, CustomerCredit};

const CUSTOMER_COLUMNS: &str =
    "id, siigo_id, identification, name, email, phone, is_active, created_at, updated_at";

/// A customer as mapped from SIIGO.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerUpsert {
    pub siigo_id: String,
    pub identification: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
}

impl CustomerUpsert {
    fn differs_from(&self, existing: &Customer) -> bool {
        existing.siigo_id.as_deref() != Some(self.siigo_id.as_str())
            || existing.identification != self.identification
            || existing.name != self.name
            || existing.email != self.email
            || existing.phone != self.phone
            || existing.is_active != self.is_active
    }
}

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    pub async fn get_by_identification(&self, identification: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE identification = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(identification)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    async fn get_by_siigo_id(&self, siigo_id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE siigo_id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(siigo_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    /// Searches active customers by name or identification.
    pub async fn search(&self, query: &str, limit: u32) -> DbResult<Vec<Customer>> {
        let query = query.trim();
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers
             WHERE is_active = 1
               AND (?1 = '' OR name LIKE ?2 ESCAPE '\\' OR identification LIKE ?2 ESCAPE '\\')
             ORDER BY name
             LIMIT ?3"
        );
        let customers = sqlx::query_as::<_, Customer>(&sql)
            .bind(query)
            .bind(like_pattern(query))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(customers)
    }

    /// Merges a SIIGO customer, matching by `siigo_id` then identification.
    ///
    /// New customers get a cash-only credit line in the same transaction.
    pub async fn upsert_from_siigo(&self, row: &CustomerUpsert) -> DbResult<(String, UpsertOutcome)> {
        let now = Utc::now();

        let existing = match self.get_by_siigo_id(&row.siigo_id).await? {
            Some(c) => Some(c),
            None => self.get_by_identification(&row.identification).await?,
        };

        match existing {
            None => {
                let id = Uuid::new_v4().to_string();
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO customers (
                        id, siigo_id, identification, name, email, phone,
                        is_active, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    "#,
                )
                .bind(&id)
                .bind(&row.siigo_id)
                .bind(&row.identification)
                .bind(&row.name)
                .bind(&row.email)
                .bind(&row.phone)
                .bind(row.is_active)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO customer_credit (customer_id, credit_limit_cents, current_balance_cents, updated_at)
                     VALUES (?1, 0, 0, ?2)",
                )
                .bind(&id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                debug!(identification = %row.identification, "Imported new customer");
                Ok((id, UpsertOutcome::Inserted))
            }
            Some(customer) if !row.differs_from(&customer) => {
                Ok((customer.id, UpsertOutcome::Unchanged))
            }
            Some(customer) => {
                sqlx::query(
                    r#"
                    UPDATE customers SET
                        siigo_id = ?2, identification = ?3, name = ?4, email = ?5,
                        phone = ?6, is_active = ?7, updated_at = ?8
                    WHERE id = ?1
                    "#,
                )
                .bind(&customer.id)
                .bind(&row.siigo_id)
                .bind(&row.identification)
                .bind(&row.name)
                .bind(&row.email)
                .bind(&row.phone)
                .bind(row.is_active)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok((customer.id, UpsertOutcome::Updated))
            }
        }
    }

    /// Returns the customer's credit line; customers without a row are
    /// cash-only.
    pub async fn get_credit(&self, customer_id: &str) -> DbResult<CustomerCredit> {
        if self.get_by_id(customer_id).await?.is_none() {
            return Err(DbError::not_found("Customer", customer_id));
        }

        let credit = sqlx::query_as::<_, CustomerCredit>(
            "SELECT customer_id, credit_limit_cents, current_balance_cents, updated_at
             FROM customer_credit WHERE customer_id = ?1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(credit.unwrap_or_else(|| CustomerCredit::cash_only(customer_id)))
    }

    /// Sets the credit limit, keeping the current balance.
    pub async fn set_credit_limit(&self, customer_id: &str, limit_cents: i64) -> DbResult<CustomerCredit> {
        if self.get_by_id(customer_id).await?.is_none() {
            return Err(DbError::not_found("Customer", customer_id));
        }

        sqlx::query(
            r#"
            INSERT INTO customer_credit (customer_id, credit_limit_cents, current_balance_cents, updated_at)
            VALUES (?1, ?2, 0, ?3)
            ON CONFLICT (customer_id) DO UPDATE SET
                credit_limit_cents = excluded.credit_limit_cents,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(customer_id)
        .bind(limit_cents)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(customer_id = %customer_id, limit_cents, "Credit limit set");
        self.get_credit(customer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn row(siigo_id: &str, identification: &str, name: &str) -> CustomerUpsert {
        CustomerUpsert {
            siigo_id: siigo_id.to_string(),
            identification: identification.to_string(),
            name: name.to_string(),
            email: Some("compras@tienda.co".to_string()),
            phone: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();

        let (id, outcome) = repo
            .upsert_from_siigo(&row("c-1", "900123456", "Tienda La Esquina"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let (_, outcome) = repo
            .upsert_from_siigo(&row("c-1", "900123456", "Tienda La Esquina"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let (same, outcome) = repo
            .upsert_from_siigo(&row("c-1", "900123456", "Tienda La Esquina SAS"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(same, id);

        assert_eq!(repo.search("esquina", 10).await.unwrap().len(), 1);
        assert_eq!(repo.search("900123", 10).await.unwrap().len(), 1);
        assert_eq!(
            repo.get_by_identification("900123456").await.unwrap().unwrap().name,
            "Tienda La Esquina SAS"
        );
    }

    #[tokio::test]
    async fn test_credit_defaults_to_cash_only() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.customers();
        let (id, _) = repo
            .upsert_from_siigo(&row("c-1", "900123456", "Tienda"))
            .await
            .unwrap();

        let credit = repo.get_credit(&id).await.unwrap();
        assert!(credit.is_cash_only());

        let credit = repo.set_credit_limit(&id, 5_000_000).await.unwrap();
        assert_eq!(credit.credit_limit_cents, 5_000_000);
        assert_eq!(credit.current_balance_cents, 0);

        assert!(repo.get_credit("missing").await.unwrap_err().is_not_found());
    }
}
