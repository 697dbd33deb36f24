//! # Surtido API
//!
//! REST server for orders, catalog and customers, with the SIIGO sync
//! agent running in the background.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default info,surtido=debug,sqlx=warn)            │
//! │  2. ApiConfig from SURTIDO_* env vars                                   │
//! │  3. SQLite pool + migrations                                            │
//! │  4. SiigoConfig + SyncAgent (skipped if disabled or misconfigured)      │
//! │  5. axum::serve until Ctrl+C / SIGTERM                                  │
//! │  6. agent shutdown, pool close                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use surtido_api::{app, ApiConfig, AppState};
use surtido_db::{Database, DbConfig};
use surtido_siigo::{SiigoConfig, SyncAgent, SyncAgentHandle};

const DEFAULT_LOG_FILTER: &str = "info,surtido=debug,sqlx=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(true)
        .init();

    info!("Starting Surtido API server...");

    let config = ApiConfig::load()?;
    info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path.display(),
        sync_enabled = config.sync_enabled,
        "Configuration loaded"
    );

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let db = Database::new(DbConfig::new(&config.db_path))
        .await
        .context("opening database")?;

    let sync = start_sync(&config, &db);

    let state = AppState::new(db.clone(), sync.clone());
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sync) = sync {
        sync.shutdown().await;
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Starts the SIIGO agent. A bad SIIGO configuration leaves the API up
/// without sync rather than refusing to start.
fn start_sync(config: &ApiConfig, db: &Database) -> Option<SyncAgentHandle> {
    if !config.sync_enabled {
        info!("SIIGO sync disabled");
        return None;
    }

    match SiigoConfig::load(config.siigo_config.clone()).and_then(|c| SyncAgent::new(c, db.clone())) {
        Ok(agent) => Some(agent.start()),
        Err(e) => {
            warn!(error = %e, "SIIGO sync not started");
            None
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
