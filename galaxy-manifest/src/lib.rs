//! Build discovery, manifest normalisation, patch resolution and diffing
//! for the GOG Galaxy content-system
//!
//! The crate turns the two incompatible manifest generations (V1 blob-based
//! and V2 chunk-based) into one normalised model:
//!
//! - [`resolver::ManifestResolver`] locates builds and produces
//!   [`types::Manifest`] values, with a direct path for delisted content
//! - [`patches::get_patch`] resolves xdelta3 differential updates
//! - [`diff::compare`] partitions two builds into download work
//!
//! Wire schemas live in [`v1`] and [`v2`]; raw JSON is kept on the
//! normalised values for archival fidelity.

pub mod diff;
pub mod error;
pub mod patches;
pub mod resolver;
pub mod types;
pub mod v1;
pub mod v2;

pub use error::{Error, Result};
pub use resolver::{BuildInfo, DirectSource, ManifestResolver};
pub use types::{
    Chunk, Depot, DepotItem, DepotSource, FilePatchDiff, Manifest, ManifestDiff, Patch, SfcRef,
    V1BlobItem, V1FileItem, V2FileItem, V2SfcItem,
};
