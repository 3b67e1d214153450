//! Error types for download operations

use thiserror::Error;

/// Error types for the downloader
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying API or transport failure
    #[error(transparent)]
    Client(#[from] galaxy_client::Error),

    /// Content address does not exist on any CDN
    #[error("Not found: {resource}")]
    NotFound {
        /// Resource being downloaded
        resource: String,
    },

    /// Downloaded content failed verification after the retry budget
    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        /// File or chunk being verified
        path: String,
        /// Expected MD5 (lowercase hex)
        expected: String,
        /// Actual MD5 (lowercase hex)
        actual: String,
    },

    /// Operation aborted through the cancellation token
    ///
    /// Partial files are preserved, neither deleted nor truncated.
    #[error("Cancelled")]
    Cancelled,

    /// Item cannot be dispatched as requested
    #[error("Invalid item {path}: {reason}")]
    InvalidItem {
        /// Item path
        path: String,
        /// Reason the item cannot be downloaded
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for download operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a hash mismatch error
    pub fn hash_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid item error
    pub fn invalid_item(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidItem {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a 404 on either layer
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Client(galaxy_client::Error::NotFound { .. })
        )
    }
}
