//! Error types for Galaxy API and CDN operations

use thiserror::Error;

/// Error types for client operations
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource does not exist on the endpoint
    #[error("Not found: {resource}")]
    NotFound {
        /// Resource being requested
        resource: String,
    },

    /// Bearer token rejected and refresh did not recover
    #[error("Authorization failed: {reason}")]
    Auth {
        /// Reason the authorization failed
        reason: String,
    },

    /// Retry budget exhausted on a transient failure
    #[error("Network failed after {attempts} attempts: {resource}")]
    NetworkFailed {
        /// Resource being requested
        resource: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Downloaded body hash does not match the expected content address
    #[error("Hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource being verified
        resource: String,
        /// Expected MD5 (lowercase hex)
        expected: String,
        /// Actual MD5 (lowercase hex)
        actual: String,
    },

    /// Response body could not be interpreted
    #[error("Invalid response from {resource}: {reason}")]
    InvalidResponse {
        /// Resource being requested
        resource: String,
        /// Reason the response is invalid
        reason: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// JSON decode failed
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

// Helper methods for common error construction
impl Error {
    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an authorization error
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Create a network failed error
    pub fn network_failed(resource: impl Into<String>, attempts: u32) -> Self {
        Self::NetworkFailed {
            resource: resource.into(),
            attempts,
        }
    }

    /// Create a hash mismatch error
    pub fn hash_mismatch(
        resource: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            resource: resource.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a rate limited error
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }
}
