//! Generation-1 wire schema
//!
//! V1 manifests are plain JSON on the public CDN. The repository manifest
//! carries the complete file table; files are byte ranges of a single
//! monolithic depot blob.

use serde::Deserialize;

/// V1 repository manifest
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// File table of the depot blob
    pub files: Vec<FileEntry>,
    /// The depot blob the files are sliced from
    pub depot: DepotInfo,
    #[serde(default, alias = "installDirectory")]
    pub install_directory: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One logical file inside the depot blob
#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub offset: u64,
    /// MD5 of the extracted file
    pub hash: String,
}

/// The monolithic depot blob
#[derive(Debug, Clone, Deserialize)]
pub struct DepotInfo {
    /// Uncompressed size of `main.bin` in bytes
    pub size: u64,
    /// MD5 of the complete blob
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default, alias = "compressedSize")]
    pub compressed_size: Option<u64>,
}
