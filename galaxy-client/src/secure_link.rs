//! Secure-link provider
//!
//! The store and patch-store CDN roots are only reachable through signed,
//! time-limited URL templates minted by the content-system API. Templates
//! are cached per `(product, root)` and refreshed shortly before expiry.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

use crate::{ApiClient, Error, Result};

/// Placeholder left in every merged template at the content-path position
pub const GALAXY_PATH_TOKEN: &str = "{GALAXY_PATH}";

/// Refresh this many seconds before the server-declared expiry
const EXPIRY_SKEW_SECS: i64 = 60;

/// Lifetime assumed when the response does not declare an expiry
const DEFAULT_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct CachedLinks {
    urls: Vec<String>,
    expires_at: i64,
}

impl CachedLinks {
    fn is_valid(&self, now: i64) -> bool {
        now < self.expires_at - EXPIRY_SKEW_SECS
    }
}

type CacheKey = (String, String);

/// Mints and caches CDN-signed base URLs for store and patch-store roots
///
/// The outer map lock is held only for entry lookup and insertion; the HTTP
/// refresh runs under a per-key async lock so concurrent callers trigger
/// exactly one refresh.
pub struct SecureLinkProvider {
    api: ApiClient,
    cache: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<Option<CachedLinks>>>>>,
}

impl SecureLinkProvider {
    /// Create a provider backed by the given API client
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Signed URL templates for the store root of a product
    ///
    /// Each returned template contains the literal `{GALAXY_PATH}` token;
    /// templates are ordered by ascending endpoint priority.
    pub async fn store_urls(&self, product_id: &str, generation: u32) -> Result<Vec<String>> {
        self.resolve((product_id.to_string(), "/".to_string()), || {
            let api = self.api.clone();
            let product_id = product_id.to_string();
            async move { api.secure_link(&product_id, "/", generation).await }
        })
        .await
    }

    /// Signed URL templates for the patch-store root of a product
    pub async fn patch_store_urls(
        &self,
        product_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Vec<String>> {
        let root = format!("/patches/store/{product_id}");
        self.resolve((product_id.to_string(), root), || {
            let api = self.api.clone();
            let product_id = product_id.to_string();
            let client_id = client_id.to_string();
            let client_secret = client_secret.to_string();
            async move {
                api.patch_secure_link(&product_id, &client_id, &client_secret)
                    .await
            }
        })
        .await
    }

    async fn resolve<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let slot = {
            let mut cache = self.cache.lock();
            Arc::clone(cache.entry(key.clone()).or_default())
        };

        let mut entry = slot.lock().await;
        let now = unix_now();
        if let Some(cached) = entry.as_ref() {
            if cached.is_valid(now) {
                trace!("secure link cache hit for {:?}", key);
                return Ok(cached.urls.clone());
            }
            debug!("secure link for {:?} expired, refreshing", key);
        }

        let response = fetch().await?;
        let cached = parse_secure_link(&response)?;
        let urls = cached.urls.clone();
        *entry = Some(cached);
        Ok(urls)
    }
}

/// Merge a secure-link response into priority-ordered URL templates
fn parse_secure_link(response: &Value) -> Result<CachedLinks> {
    let endpoints = response
        .get("urls")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::invalid_response("secure_link", "missing urls array"))?;

    let mut ranked: Vec<(i64, String)> = Vec::with_capacity(endpoints.len());
    let mut expires_at: Option<i64> = None;

    for endpoint in endpoints {
        let url_format = endpoint
            .get("url_format")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_response("secure_link", "endpoint without url_format"))?;
        let priority = endpoint.get("priority").and_then(Value::as_i64).unwrap_or(0);

        let mut url = url_format.to_string();
        if let Some(parameters) = endpoint.get("parameters").and_then(Value::as_object) {
            for (name, value) in parameters {
                let replacement = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                url = url.replace(&format!("{{{name}}}"), &replacement);

                if name == "expires_at" {
                    if let Some(ts) = value.as_i64().or_else(|| value.as_str()?.parse().ok()) {
                        expires_at = Some(expires_at.map_or(ts, |cur| cur.min(ts)));
                    }
                }
            }
        }

        if !url.contains(GALAXY_PATH_TOKEN) {
            return Err(Error::invalid_response(
                "secure_link",
                format!("merged template lacks {GALAXY_PATH_TOKEN}: {url}"),
            ));
        }
        ranked.push((priority, url));
    }

    if ranked.is_empty() {
        return Err(Error::invalid_response("secure_link", "no endpoints"));
    }

    ranked.sort_by_key(|(priority, _)| *priority);

    Ok(CachedLinks {
        urls: ranked.into_iter().map(|(_, url)| url).collect(),
        expires_at: expires_at.unwrap_or_else(|| unix_now() + DEFAULT_LIFETIME_SECS),
    })
}

#[allow(clippy::cast_possible_wrap)]
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
