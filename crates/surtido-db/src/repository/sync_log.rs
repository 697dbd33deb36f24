//! # SIIGO Sync Log Repository
//!
//! Audit trail of every SIIGO interaction worth looking at later (imports,
//! invoice updates, stock reconciliations) plus the small key/value store the
//! background tasks use for their cursors.
//!
//! ```text
//! importer ──┐
//! poller   ──┼──► record() ──► siigo_sync_log ──► recent() ──► GET /api/sync/log
//! stock    ──┘
//!
//! poller ──► get_state("invoice_poller.last_run") / set_state(...) ──► sync_state
//! ```

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use surtido_core::{SyncAction, SyncLogEntry, SyncLogStatus};

const LOG_COLUMNS: &str =
    "id, entity_type, entity_id, siigo_id, action, status, message, created_at";

/// A log entry to be recorded.
///
/// ```rust,ignore
/// db.sync_log()
///     .record(
///         &NewSyncLogEntry::new("product", SyncAction::ProductImport, SyncLogStatus::Error)
///             .siigo_id(&siigo_product.id)
///             .message(err.to_string()),
///     )
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct NewSyncLogEntry {
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub siigo_id: Option<String>,
    pub action: SyncAction,
    pub status: SyncLogStatus,
    pub message: Option<String>,
}

impl NewSyncLogEntry {
    pub fn new(entity_type: impl Into<String>, action: SyncAction, status: SyncLogStatus) -> Self {
        NewSyncLogEntry {
            entity_type: entity_type.into(),
            entity_id: None,
            siigo_id: None,
            action,
            status,
            message: None,
        }
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn siigo_id(mut self, id: impl Into<String>) -> Self {
        self.siigo_id = Some(id.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

impl SyncLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Appends an entry to the log.
    pub async fn record(&self, entry: &NewSyncLogEntry) -> DbResult<SyncLogEntry> {
        let row = SyncLogEntry {
            id: Uuid::new_v4().to_string(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            siigo_id: entry.siigo_id.clone(),
            action: entry.action,
            status: entry.status,
            message: entry.message.clone(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO siigo_sync_log (
                id, entity_type, entity_id, siigo_id, action, status, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&row.id)
        .bind(&row.entity_type)
        .bind(&row.entity_id)
        .bind(&row.siigo_id)
        .bind(row.action)
        .bind(row.status)
        .bind(&row.message)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok(row)
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SyncLogEntry>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM siigo_sync_log ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        );
        let entries = sqlx::query_as::<_, SyncLogEntry>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    /// Entries about one local entity, most recent first.
    pub async fn for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: u32,
    ) -> DbResult<Vec<SyncLogEntry>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM siigo_sync_log
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        );
        let entries = sqlx::query_as::<_, SyncLogEntry>(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    /// Deletes entries older than `days_old` days. Returns how many.
    pub async fn cleanup_old_entries(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));
        let result = sqlx::query("DELETE FROM siigo_sync_log WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        debug!(deleted = result.rows_affected(), days_old, "Sync log cleanup");
        Ok(result.rows_affected())
    }

    /// Reads a cursor or other small piece of sync state.
    pub async fn get_state(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Writes (or overwrites) a piece of sync state.
    pub async fn set_state(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
