//! # SIIGO Authentication
//!
//! Exchanges the API user's credentials for a bearer token and keeps it
//! fresh.
//!
//! ## Authentication Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SiigoClient                SiigoAuth                  SIIGO            │
//! │      │  get_token()            │                          │             │
//! │      │────────────────────────►│                          │             │
//! │      │                         │ cached & not near expiry?│             │
//! │      │                         │──── yes: return it       │             │
//! │      │                         │                          │             │
//! │      │                         │ POST /auth               │             │
//! │      │                         │ {username, access_key}   │             │
//! │      │                         │ Partner-Id: surtido      │             │
//! │      │                         │─────────────────────────►│             │
//! │      │                         │ {access_token,expires_in}│             │
//! │      │◄────────────────────────│◄─────────────────────────│             │
//! │      │                         │                          │             │
//! │      │  [resource call → 401]  │                          │             │
//! │      │  invalidate()           │                          │             │
//! │      │────────────────────────►│  next get_token() re-authenticates     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tokens last 24 hours; they are renewed 5 minutes before expiry, or after
//! four fifths of their lifetime when SIIGO hands out a shorter one.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SiigoError, SiigoResult};
use crate::model::{AuthRequest, AuthResponse, ErrorBody};

/// Margin before token expiration to trigger re-authentication (5 minutes).
const REFRESH_MARGIN_SECS: u64 = 300;

/// The margin never exceeds this fraction of the token's lifetime.
const REFRESH_MARGIN_DIVISOR: u32 = 5;

/// A bearer token and when it stops being valid.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub access_token: String,
    pub expires_at: Instant,
    refresh_at: Instant,
}

impl TokenInfo {
    pub fn new(access_token: String, expires_in: Duration) -> Self {
        let margin = Duration::from_secs(REFRESH_MARGIN_SECS).min(expires_in / REFRESH_MARGIN_DIVISOR);
        let now = Instant::now();
        TokenInfo {
            access_token,
            expires_at: now + expires_in,
            refresh_at: now + (expires_in - margin),
        }
    }

    /// Check if the token is expired or about to expire.
    pub fn needs_refresh(&self) -> bool {
        Instant::now() >= self.refresh_at
    }

    pub fn remaining_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

/// Token cache for one SIIGO API user.
pub struct SiigoAuth {
    http: reqwest::Client,
    auth_url: Url,
    username: String,
    access_key: String,
    partner_id: String,
    token: RwLock<Option<TokenInfo>>,
}

impl SiigoAuth {
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        username: impl Into<String>,
        access_key: impl Into<String>,
        partner_id: impl Into<String>,
    ) -> SiigoResult<Self> {
        Ok(SiigoAuth {
            http,
            auth_url: base_url.join("auth")?,
            username: username.into(),
            access_key: access_key.into(),
            partner_id: partner_id.into(),
            token: RwLock::new(None),
        })
    }

    /// Returns a valid access token, authenticating when needed.
    pub async fn get_token(&self) -> SiigoResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.needs_refresh() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.authenticate().await?;
        info!(expires_in_secs = token.remaining_secs(), "Authenticated with SIIGO");
        let access_token = token.access_token.clone();
        *guard = Some(token);

        Ok(access_token)
    }

    /// Drops the cached token; the next call re-authenticates.
    pub async fn invalidate(&self) {
        if self.token.write().await.take().is_some() {
            debug!("SIIGO token invalidated");
        }
    }

    async fn authenticate(&self) -> SiigoResult<TokenInfo> {
        debug!(url = %self.auth_url, "Requesting SIIGO access token");

        let response = self
            .http
            .post(self.auth_url.clone())
            .header("Partner-Id", &self.partner_id)
            .json(&AuthRequest {
                username: &self.username,
                access_key: &self.access_key,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: AuthResponse = response.json().await?;
            return Ok(TokenInfo::new(
                body.access_token,
                Duration::from_secs(body.expires_in),
            ));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.summary())
            .unwrap_or(text);

        warn!(status = status.as_u16(), %message, "SIIGO authentication rejected");

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => SiigoError::RateLimited { retry_after: None },
            s if s.is_server_error() => SiigoError::Server {
                status: s.as_u16(),
                message,
            },
            _ => SiigoError::AuthFailed(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_short_token_uses_proportional_margin() {
        // 1 minute lifetime: the margin shrinks to 12 seconds
        let token = TokenInfo::new("t".into(), Duration::from_secs(60));
        assert!(!token.needs_refresh());

        tokio::time::advance(Duration::from_secs(47)).await;
        assert!(!token.needs_refresh());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(token.needs_refresh());
    }

    #[tokio::test]
    async fn test_expired_token_needs_refresh() {
        let token = TokenInfo::new("t".into(), Duration::ZERO);
        assert!(token.needs_refresh());
    }

    #[tokio::test]
    async fn test_token_no_refresh_needed() {
        let token = TokenInfo::new("t".into(), Duration::from_secs(86_400));
        assert!(!token.needs_refresh());
        assert!(token.remaining_secs() > 86_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_ages_into_refresh() {
        let token = TokenInfo::new("t".into(), Duration::from_secs(3_600));
        assert!(!token.needs_refresh());

        tokio::time::advance(Duration::from_secs(3_301)).await;
        assert!(token.needs_refresh());
    }

    #[test]
    fn test_auth_url_is_joined_to_base() {
        let base = Url::parse("https://api.siigo.com/").unwrap();
        let auth = SiigoAuth::new(reqwest::Client::new(), &base, "u", "k", "p").unwrap();
        assert_eq!(auth.auth_url.as_str(), "https://api.siigo.com/auth");
    }
}
