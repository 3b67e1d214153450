//! RGOG: a deterministic, seekable archive container for mirrored Galaxy
//! CDN trees
//!
//! A packed archive is one or more part files with 64-byte-aligned
//! sections and little-endian integers; metadata always precedes the data
//! it describes, so listing an archive never reads chunk payloads. Packing
//! is deterministic: the same input tree and part-size bound produce
//! byte-identical parts on any host, and `unpack(pack(tree)) == tree`.
//!
//! - [`writer::pack`] serialises a `v2/{meta,store}` mirror into parts
//! - [`reader::Archive`] opens parts, indexes chunks, lists and verifies
//! - [`extract::unpack`] / [`extract::extract`] stream content back out

pub mod error;
pub mod extract;
pub mod format;
pub mod languages;
pub mod reader;
pub mod writer;

pub use error::{Error, Result};
pub use extract::{ExtractOptions, UnpackOptions, extract, unpack};
pub use format::{DEFAULT_MAX_PART_SIZE, Header, TYPE_BASE, TYPE_PATCH, VERSION};
pub use reader::{Archive, ArchiveStats, BuildSummary};
pub use writer::{PackOptions, PackSummary, pack};
