//! Error types for archive operations

use thiserror::Error;

/// Error types for RGOG pack, unpack and inspection
#[derive(Error, Debug)]
pub enum Error {
    /// Archive violates the format: bad magic, out-of-bounds section,
    /// declared size mismatch
    #[error("Invalid archive: {reason}")]
    InvalidArchive {
        /// What is wrong with the archive
        reason: String,
    },

    /// Unknown archive version or type
    #[error("Unsupported: {what}")]
    Unsupported {
        /// What is unsupported
        what: String,
    },

    /// Stored content does not hash to its declared address
    #[error("Hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Blob or chunk being verified
        resource: String,
        /// Expected MD5 (lowercase hex)
        expected: String,
        /// Actual MD5 (lowercase hex)
        actual: String,
    },

    /// Requested build or chunk is not in the archive
    #[error("Not found in archive: {resource}")]
    NotFound {
        /// What was requested
        resource: String,
    },

    /// Input tree is not a valid CDN mirror
    #[error("Invalid input tree: {reason}")]
    InvalidInput {
        /// What is wrong with the input
        reason: String,
    },

    /// JSON decode failed
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid archive error
    pub fn invalid_archive(reason: impl Into<String>) -> Self {
        Self::InvalidArchive {
            reason: reason.into(),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
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

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}
