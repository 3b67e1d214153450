//! Token provider capability
//!
//! The content-system endpoints that mint secure links require a bearer
//! token. Acquiring and persisting tokens is the caller's concern; the
//! client only consumes this capability.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::Result;

/// Supplies a current bearer token and refreshes it on demand
///
/// Implementations must be safe to share across download workers: refresh
/// is single-writer, reads are concurrent.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return the current access token
    async fn access_token(&self) -> Result<String>;

    /// Force a refresh and return the new access token
    ///
    /// Called after a 401; implementations should invalidate the old token
    /// before returning.
    async fn refresh(&self) -> Result<String>;
}

/// Fixed-token provider for tests and pre-authorized environments
///
/// `refresh` hands back the same token; a 401 with this provider therefore
/// surfaces as an authorization error after one retry.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: RwLock<String>,
}

impl StaticTokenProvider {
    /// Create a provider around a fixed token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Replace the stored token
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.read().clone())
    }

    async fn refresh(&self) -> Result<String> {
        self.access_token().await
    }
}
