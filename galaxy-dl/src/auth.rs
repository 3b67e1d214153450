//! File-backed token provider
//!
//! Persists the OAuth session in `auth.json` under the user config
//! directory (`XDG_CONFIG_HOME` on Linux, `%APPDATA%` on Windows) and
//! refreshes the access token through the refresh-token grant when it is
//! near expiry or rejected.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use galaxy_client::{ApiClient, Error, Result, TokenProvider};

/// OAuth client id of the Galaxy desktop client
pub const GALAXY_CLIENT_ID: &str = "46899977096215655";

/// OAuth client secret of the Galaxy desktop client
pub const GALAXY_CLIENT_SECRET: &str =
    "9d85c43b1482497dbbce61f6e4aa173a433796eeae2ca8c5f6129f2dc4de46d9";

/// Redirect URI registered for the desktop client flow
pub const REDIRECT_URI: &str = "https://embed.gog.com/on_login_success?origin=client";

/// Refresh this many seconds before the token expires
const EXPIRY_SKEW_SECS: i64 = 60;

/// Persisted session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuth {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    /// Unix timestamp the access token expires at
    pub expires_at: i64,
}

/// Location of `auth.json`
pub fn auth_file_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| Error::auth("no config directory on this system"))?;
    Ok(base.join("galaxy-dl").join("auth.json"))
}

/// The login URL the user opens in a browser to obtain a code
pub fn login_url(auth_url: &str) -> String {
    format!(
        "{auth_url}/auth?client_id={GALAXY_CLIENT_ID}&redirect_uri={REDIRECT_URI}&response_type=code&layout=client2"
    )
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn parse_token_response(value: &serde_json::Value) -> Result<StoredAuth> {
    let access_token = value
        .get("access_token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::auth("token response without access_token"))?;
    let refresh_token = value
        .get("refresh_token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::auth("token response without refresh_token"))?;
    let expires_in = value
        .get("expires_in")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(3600);
    let user_id = value
        .get("user_id")
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    Ok(StoredAuth {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        user_id,
        expires_at: unix_now() + expires_in,
    })
}

/// Exchange a login code for a session and persist it
pub async fn login_with_code(api: &ApiClient, code: &str) -> Result<StoredAuth> {
    let response = api
        .oauth_token(&[
            ("client_id", GALAXY_CLIENT_ID),
            ("client_secret", GALAXY_CLIENT_SECRET),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
        ])
        .await?;
    let auth = parse_token_response(&response)?;
    save_auth(&auth)?;
    info!("logged in as user {}", auth.user_id);
    Ok(auth)
}

fn save_auth(auth: &StoredAuth) -> Result<()> {
    let path = auth_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_vec_pretty(auth)?)?;
    debug!("session saved to {}", path.display());
    Ok(())
}

fn load_auth() -> Result<StoredAuth> {
    let path = auth_file_path()?;
    let bytes = std::fs::read(&path)
        .map_err(|_| Error::auth(format!("not logged in ({} missing)", path.display())))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Token provider over the persisted session
///
/// Reads are served from an in-memory copy; refresh is single-writer and
/// re-persists the rotated tokens.
pub struct FileTokenProvider {
    api: ApiClient,
    cached: Mutex<Option<StoredAuth>>,
}

impl FileTokenProvider {
    /// Create a provider; the session is loaded lazily on first use
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            cached: Mutex::new(None),
        }
    }

    fn current(&self) -> Result<StoredAuth> {
        let mut cached = self.cached.lock();
        if let Some(auth) = cached.as_ref() {
            return Ok(auth.clone());
        }
        let auth = load_auth()?;
        *cached = Some(auth.clone());
        Ok(auth)
    }

    async fn refresh_inner(&self) -> Result<StoredAuth> {
        let current = self.current()?;
        let response = self
            .api
            .oauth_token(&[
                ("client_id", GALAXY_CLIENT_ID),
                ("client_secret", GALAXY_CLIENT_SECRET),
                ("grant_type", "refresh_token"),
                ("refresh_token", &current.refresh_token),
            ])
            .await
            .map_err(|e| Error::auth(format!("token refresh failed: {e}")))?;
        let auth = parse_token_response(&response)?;
        save_auth(&auth)?;
        *self.cached.lock() = Some(auth.clone());
        debug!("access token refreshed");
        Ok(auth)
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let current = self.current()?;
        if unix_now() < current.expires_at - EXPIRY_SKEW_SECS {
            return Ok(current.access_token);
        }
        Ok(self.refresh_inner().await?.access_token)
    }

    async fn refresh(&self) -> Result<String> {
        Ok(self.refresh_inner().await?.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_response_parses_numeric_user_id() {
        let auth = parse_token_response(&json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user_id": 1234,
        }))
        .unwrap();
        assert_eq!(auth.access_token, "at");
        assert_eq!(auth.user_id, "1234");
        assert!(auth.expires_at > unix_now());
    }

    #[test]
    fn token_response_without_tokens_is_an_auth_error() {
        let err = parse_token_response(&json!({"expires_in": 10})).unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
    }

    #[test]
    fn login_url_embeds_the_client_id() {
        let url = login_url("https://auth.gog.com");
        assert!(url.starts_with("https://auth.gog.com/auth?"));
        assert!(url.contains(GALAXY_CLIENT_ID));
        assert!(url.contains("response_type=code"));
    }
}
