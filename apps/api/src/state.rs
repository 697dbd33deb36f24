//! Shared state handed to every handler.

use surtido_db::Database;
use surtido_siigo::SyncAgentHandle;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// `None` when SIIGO sync is disabled or its configuration is invalid.
    pub sync: Option<SyncAgentHandle>,
}

impl AppState {
    pub fn new(db: Database, sync: Option<SyncAgentHandle>) -> Self {
        AppState { db, sync }
    }

    /// The sync agent, or `SYNC_UNAVAILABLE`.
    pub fn sync(&self) -> Result<&SyncAgentHandle, ApiError> {
        self.sync.as_ref().ok_or_else(ApiError::sync_unavailable)
    }
}
