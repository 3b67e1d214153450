//! Error types for manifest resolution and diffing

use thiserror::Error;

/// Error types for manifest operations
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying API or transport failure
    #[error(transparent)]
    Client(#[from] galaxy_client::Error),

    /// Build or manifest does not exist
    #[error("Not found: {resource}")]
    NotFound {
        /// Resource being resolved
        resource: String,
    },

    /// Manifest JSON did not match the expected shape
    #[error("Invalid manifest for {resource}: {reason}")]
    InvalidManifest {
        /// Manifest being parsed
        resource: String,
        /// Reason the manifest is invalid
        reason: String,
    },

    /// Feature or format the engine does not support
    #[error("Unsupported: {what}")]
    Unsupported {
        /// What is unsupported
        what: String,
    },
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invalid manifest error
    pub fn invalid_manifest(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }
}
