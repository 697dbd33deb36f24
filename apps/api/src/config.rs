//! API server configuration.
//!
//! Loaded from environment variables with fallback to defaults. SIIGO
//! credentials live in their own file (see `surtido_siigo::SiigoConfig`).

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use directories::ProjectDirs;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DB_FILE_NAME: &str = "surtido.db";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,

    /// SQLite database file
    pub db_path: PathBuf,

    /// Explicit `siigo.toml`; `None` uses the platform config directory
    pub siigo_config: Option<PathBuf>,

    /// Start the SIIGO sync agent
    pub sync_enabled: bool,
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable               | Default                         |
    /// |------------------------|---------------------------------|
    /// | `SURTIDO_BIND_ADDR`    | `127.0.0.1:8080`                |
    /// | `SURTIDO_DB_PATH`      | `<data dir>/surtido.db`         |
    /// | `SURTIDO_SIIGO_CONFIG` | `<config dir>/siigo.toml`       |
    /// | `SURTIDO_SYNC_ENABLED` | `true`                          |
    pub fn load() -> Result<Self, ConfigError> {
        let bind_addr = env::var("SURTIDO_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SURTIDO_BIND_ADDR".to_string()))?;

        let db_path = match env::var("SURTIDO_DB_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_db_path(),
        };

        let siigo_config = env::var("SURTIDO_SIIGO_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let sync_enabled = match env::var("SURTIDO_SYNC_ENABLED") {
            Ok(value) => parse_bool(&value)
                .ok_or_else(|| ConfigError::InvalidValue("SURTIDO_SYNC_ENABLED".to_string()))?,
            Err(_) => true,
        };

        Ok(ApiConfig {
            bind_addr,
            db_path,
            siigo_config,
            sync_enabled,
        })
    }
}

fn default_db_path() -> PathBuf {
    ProjectDirs::from("co", "surtido", "surtido")
        .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_default_db_path_ends_with_file_name() {
        assert!(default_db_path().ends_with(DB_FILE_NAME));
    }
}
