//! HTTP client for the Galaxy content-system and CDN endpoint families

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::{Config, Error, Result, TokenProvider, utils};

/// Whether an endpoint requires a bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// Public endpoint
    None,
    /// Authorization: Bearer from the token provider
    Bearer,
}

/// Typed HTTP access to the Galaxy endpoint families
///
/// Owns the shared `reqwest::Client`; every subsystem reuses its connection
/// pool. JSON endpoints transparently inflate zlib-compressed bodies; the
/// `*_raw` variants return the bytes exactly as served for archival.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<Config>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("has_token_provider", &self.token_provider.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Create a client with the given endpoint configuration
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(20)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
            token_provider: None,
        })
    }

    /// Attach a token provider for the authenticated endpoint families
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// The endpoint configuration this client was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Calculate backoff duration with exponential backoff and jitter
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter_range = base * self.config.jitter_factor;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }

    async fn bearer_token(&self, force_refresh: bool) -> Result<String> {
        let provider = self
            .token_provider
            .as_ref()
            .ok_or_else(|| Error::auth("no token provider configured"))?;
        if force_refresh {
            provider.refresh().await
        } else {
            provider.access_token().await
        }
    }

    /// Execute a GET with retry, backoff and refresh-once-on-401 semantics
    ///
    /// Returns the response body. The body read happens inside the retry
    /// loop so a truncated transfer counts as a transient failure.
    async fn get_with_retry(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        auth: Auth,
    ) -> Result<Vec<u8>> {
        let mut refreshed = false;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                let backoff = self.calculate_backoff(attempt - 1);
                debug!("retry attempt {} after {:?} backoff", attempt, backoff);
                sleep(backoff).await;
            }

            trace!("GET {} (attempt {})", url, attempt + 1);

            let mut request = self.client.get(url);
            if let Some((offset, len)) = range {
                request = request.header("Range", utils::range_header(offset, len));
            }
            if auth == Auth::Bearer {
                let token = self.bearer_token(false).await?;
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        match response.bytes().await {
                            Ok(bytes) => return Ok(bytes.to_vec()),
                            Err(e) if attempt < self.config.max_retries => {
                                warn!("body read failed (attempt {}): {e}", attempt + 1);
                                attempt += 1;
                                continue;
                            }
                            Err(e) => return Err(Error::Http(e)),
                        }
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(Error::not_found(url));
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        if auth == Auth::Bearer && !refreshed {
                            debug!("401 from {url}, refreshing token");
                            refreshed = true;
                            self.bearer_token(true).await?;
                            continue;
                        }
                        return Err(Error::auth(format!("401 from {url}")));
                    }

                    if Self::is_retryable_status(status) {
                        if attempt < self.config.max_retries {
                            let retry_after = Self::retry_after_secs(&response);
                            warn!(
                                "{} from {} (attempt {}): will retry",
                                status,
                                url,
                                attempt + 1
                            );
                            if let Some(secs) = retry_after {
                                sleep(Duration::from_secs(secs)).await;
                            }
                            attempt += 1;
                            continue;
                        }
                        return Err(Error::network_failed(url, attempt + 1));
                    }

                    return Err(Error::invalid_response(url, format!("status {status}")));
                }
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout() || e.is_request();
                    if retryable && attempt < self.config.max_retries {
                        warn!("request failed (attempt {}): {e}, will retry", attempt + 1);
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::Http(e));
                }
            }
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
    }

    fn retry_after_secs(response: &Response) -> Option<u64> {
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return None;
        }
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    }

    /// GET raw bytes from an arbitrary URL (chunk and blob downloads)
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.get_with_retry(url, None, Auth::None).await
    }

    /// GET a byte range `[offset, offset + len)` of a URL
    pub async fn get_range(&self, url: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.get_with_retry(url, Some((offset, len)), Auth::None)
            .await
    }

    /// GET and decode JSON, inflating zlib-compressed bodies transparently
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let body = utils::maybe_inflate(self.get_bytes(url).await?)?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::invalid_response(url, format!("JSON decode: {e}")))
    }

    async fn get_json_auth(&self, url: &str) -> Result<Value> {
        let body = utils::maybe_inflate(self.get_with_retry(url, None, Auth::Bearer).await?)?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::invalid_response(url, format!("JSON decode: {e}")))
    }

    /// List builds of a product for one platform and manifest generation
    ///
    /// The endpoint may return builds of the other generation as well;
    /// callers filter on the per-item `generation` field.
    pub async fn builds(&self, product_id: &str, platform: &str, generation: u32) -> Result<Value> {
        let url = format!(
            "{}/products/{}/os/{}/builds?generation={}",
            self.config.content_system_url, product_id, platform, generation
        );
        self.get_json(&url).await
    }

    /// Fetch a V1 manifest JSON (`repository.json` or a depot manifest)
    pub async fn v1_manifest(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        name: &str,
    ) -> Result<Value> {
        let url = self.v1_manifest_url(product_id, platform, repository_id, name);
        self.get_json(&url).await
    }

    /// URL of a V1 manifest on the public CDN
    pub fn v1_manifest_url(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        name: &str,
    ) -> String {
        format!(
            "{}/content-system/v1/manifests/{}/{}/{}/{}.json",
            self.config.cdn_url, product_id, platform, repository_id, name
        )
    }

    /// Fetch and decode a V2 manifest by its content hash
    pub async fn v2_manifest(&self, manifest_hash: &str) -> Result<Value> {
        self.get_json(&self.v2_manifest_url(manifest_hash)).await
    }

    /// Fetch the zlib-compressed V2 manifest body exactly as served
    pub async fn v2_manifest_raw(&self, manifest_hash: &str) -> Result<Vec<u8>> {
        self.get_bytes(&self.v2_manifest_url(manifest_hash)).await
    }

    /// URL of a V2 manifest on the public CDN
    pub fn v2_manifest_url(&self, manifest_hash: &str) -> String {
        format!(
            "{}/content-system/v2/meta/{}",
            self.config.cdn_url,
            utils::galaxy_path(manifest_hash)
        )
    }

    /// Fetch and decode a V2 patch manifest by its content hash
    ///
    /// Patch manifests live under the `v2/patches/meta` CDN root, separate
    /// from build depot manifests.
    pub async fn v2_patch_manifest(&self, manifest_hash: &str) -> Result<Value> {
        self.get_json(&self.v2_patch_manifest_url(manifest_hash))
            .await
    }

    /// Fetch the zlib-compressed V2 patch manifest body exactly as served
    pub async fn v2_patch_manifest_raw(&self, manifest_hash: &str) -> Result<Vec<u8>> {
        self.get_bytes(&self.v2_patch_manifest_url(manifest_hash))
            .await
    }

    /// URL of a V2 patch manifest on the public CDN
    pub fn v2_patch_manifest_url(&self, manifest_hash: &str) -> String {
        format!(
            "{}/content-system/v2/patches/meta/{}",
            self.config.cdn_url,
            utils::galaxy_path(manifest_hash)
        )
    }

    /// Mint signed URL templates for the store root of a product
    ///
    /// `path` is the CDN root the link applies to, `"/"` for the store.
    pub async fn secure_link(&self, product_id: &str, path: &str, generation: u32) -> Result<Value> {
        let url = format!(
            "{}/products/{}/secure_link?_version=2&generation={}&path={}",
            self.config.content_system_url, product_id, generation, path
        );
        self.get_json_auth(&url).await
    }

    /// Mint signed URL templates for the patch store of a product
    ///
    /// Distinct from the store secure link: the patch root requires the
    /// per-patch client credentials from the patch root manifest.
    pub async fn patch_secure_link(
        &self,
        product_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Value> {
        let url = format!(
            "{}/products/{}/secure_link?generation=2&path=/patches/store/{}&client_id={}&client_secret={}",
            self.config.content_system_url, product_id, product_id, client_id, client_secret
        );
        self.get_json_auth(&url).await
    }

    /// Query for a differential patch between two builds
    ///
    /// Three response states are valid: an `error` body (no patch for
    /// incompatible builds), a `{id, link, ...}` body, and an empty object
    /// at the link itself. Callers distinguish them.
    pub async fn patch_info(
        &self,
        product_id: &str,
        from_build_id: &str,
        to_build_id: &str,
    ) -> Result<Value> {
        let url = format!(
            "{}/products/{}/patches?from_build_id={}&to_build_id={}",
            self.config.content_system_url, product_id, from_build_id, to_build_id
        );
        self.get_json_auth(&url).await
    }

    /// Fetch and decode a manifest at an absolute URL (build `link` fields)
    pub async fn manifest_at(&self, url: &str) -> Result<Value> {
        self.get_json(url).await
    }

    /// Fetch the compressed manifest body at an absolute URL
    pub async fn manifest_at_raw(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url).await
    }

    /// Exchange OAuth parameters for a token response
    ///
    /// Used by callers implementing the login and refresh grants; the
    /// endpoint takes its parameters in the query string.
    pub async fn oauth_token(&self, params: &[(&str, &str)]) -> Result<Value> {
        let url = url::Url::parse_with_params(&format!("{}/token", self.config.auth_url), params)
            .map_err(|e| Error::invalid_response("auth/token", e.to_string()))?;
        self.get_json(url.as_str()).await
    }

    /// List product ids owned by the authenticated account
    pub async fn owned_products(&self) -> Result<Value> {
        let url = format!("{}/user/data/games", self.config.embed_url);
        self.get_json_auth(&url).await
    }
}
