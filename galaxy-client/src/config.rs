//! Endpoint and retry configuration

/// Default content-system API root
pub const DEFAULT_CONTENT_SYSTEM_URL: &str = "https://content-system.gog.com";

/// Default public CDN root serving manifests
pub const DEFAULT_CDN_URL: &str = "https://gog-cdn-fastly.gog.com";

/// Default OAuth endpoint root
pub const DEFAULT_AUTH_URL: &str = "https://auth.gog.com";

/// Default account API root (owned-products listing)
pub const DEFAULT_EMBED_URL: &str = "https://embed.gog.com";

/// Default maximum retries for transient failures
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default initial backoff in milliseconds
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default backoff multiplier
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default jitter factor (0.0 to 1.0)
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Endpoint roots and retry policy for [`crate::ApiClient`]
///
/// `Default` returns the production GOG endpoints; tests override the roots
/// to point at a stub server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Content-system API root (builds, secure links, patches)
    pub content_system_url: String,
    /// Public CDN root (V1/V2 manifests)
    pub cdn_url: String,
    /// OAuth endpoint root
    pub auth_url: String,
    /// Account API root
    pub embed_url: String,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Maximum retries for transient failures
    pub max_retries: u32,
    /// Initial backoff in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_system_url: DEFAULT_CONTENT_SYSTEM_URL.to_string(),
            cdn_url: DEFAULT_CDN_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            embed_url: DEFAULT_EMBED_URL.to_string(),
            user_agent: concat!("galaxy-dl/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Config pointing every endpoint family at a single root, for tests
    pub fn for_root(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            content_system_url: root.clone(),
            cdn_url: root.clone(),
            auth_url: root.clone(),
            embed_url: root,
            initial_backoff_ms: 10,
            ..Self::default()
        }
    }
}
