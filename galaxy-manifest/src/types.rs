//! Normalised view of builds, depots and downloadable items
//!
//! Wire JSON (see [`crate::v1`] and [`crate::v2`]) is parsed at the network
//! boundary and converted into these value types. The raw decoded JSON is
//! retained on [`Manifest`] for archival fidelity.

use serde_json::Value;

/// Path of the monolithic generation-1 depot blob
pub const V1_BLOB_PATH: &str = "main.bin";

/// Normalised view of a single build
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Base product this build belongs to
    pub base_product_id: String,
    /// User-facing build id
    pub build_id: String,
    /// Numeric legacy build id, present iff `generation == 1`
    pub repository_id: Option<String>,
    /// Manifest generation, 1 or 2
    pub generation: u32,
    /// Platform the build targets (`windows`, `osx`, `linux`)
    pub platform: String,
    /// Directory name the game installs into
    pub install_directory: String,
    /// Shippable slices of the build, in manifest order
    pub depots: Vec<Depot>,
    /// Dependency product ids (redistributables and shared tools)
    pub dependencies: Vec<String>,
    /// Decoded manifest JSON, retained verbatim for archival
    pub raw: Value,
}

impl Manifest {
    /// Depots matching a language and DLC selection
    ///
    /// A depot matches when its language set contains `"*"` or the wanted
    /// language, and its product is the base product or a wanted DLC.
    pub fn filter_depots<'a>(&'a self, language: &str, dlcs: &[String]) -> Vec<&'a Depot> {
        self.depots
            .iter()
            .filter(|d| {
                d.product_id == self.base_product_id || dlcs.iter().any(|p| *p == d.product_id)
            })
            .filter(|d| d.matches_language(language))
            .collect()
    }
}

/// A shippable slice of a build
#[derive(Debug, Clone)]
pub struct Depot {
    /// Product (base game or DLC) the depot belongs to
    pub product_id: String,
    /// Language tags the depot applies to; `"*"` denotes all
    pub languages: Vec<String>,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Compressed size in bytes
    pub compressed_size: u64,
    /// Optional bitness filter (32/64)
    pub bitness: Option<Vec<u32>>,
    /// Where the depot's items come from
    pub source: DepotSource,
}

impl Depot {
    /// Whether this depot applies to the given language
    pub fn matches_language(&self, language: &str) -> bool {
        self.languages.is_empty()
            || self
                .languages
                .iter()
                .any(|l| l == "*" || l.eq_ignore_ascii_case(language))
    }
}

/// Item source of a depot, split by manifest generation
#[derive(Debug, Clone)]
pub enum DepotSource {
    /// Generation 2: items are fetched lazily via the depot manifest hash
    V2 {
        /// Content hash of the depot manifest (32 lowercase hex chars)
        manifest: String,
    },
    /// Generation 1: the monolithic blob plus its eagerly parsed file table
    V1 {
        /// The `main.bin` blob item
        blob: V1BlobItem,
        /// Logical files extracted from the blob
        files: Vec<V1FileItem>,
    },
}

/// One file to materialise from the CDN
#[derive(Debug, Clone)]
pub enum DepotItem {
    /// The monolithic `main.bin` of a generation-1 build
    V1Blob(V1BlobItem),
    /// A logical file extracted from a V1 blob
    V1File(V1FileItem),
    /// A chunked generation-2 file
    V2File(V2FileItem),
    /// A Small Files Container, itself a downloadable chunked object
    V2Sfc(V2SfcItem),
}

impl DepotItem {
    /// Logical path of the materialised file
    pub fn path(&self) -> &str {
        match self {
            Self::V1Blob(_) => V1_BLOB_PATH,
            Self::V1File(f) => &f.path,
            Self::V2File(f) => &f.path,
            Self::V2Sfc(_) => "",
        }
    }

    /// Expected MD5 of the materialised plaintext, when known
    pub fn md5(&self) -> Option<&str> {
        match self {
            Self::V1Blob(b) => Some(&b.blob_md5),
            Self::V1File(f) => Some(&f.md5),
            Self::V2File(f) => f.md5.as_deref(),
            Self::V2Sfc(_) => None,
        }
    }

    /// Total uncompressed size of the materialised file
    pub fn total_size(&self) -> u64 {
        match self {
            Self::V1Blob(b) => b.total_size,
            Self::V1File(f) => f.size,
            Self::V2File(f) => f.total_size(),
            Self::V2Sfc(s) => s.chunks.iter().map(|c| c.size_uncompressed).sum(),
        }
    }
}

/// The monolithic `main.bin` for a generation-1 build
#[derive(Debug, Clone)]
pub struct V1BlobItem {
    /// Product the blob belongs to
    pub product_id: String,
    /// Platform path segment of the depot URL
    pub platform: String,
    /// Numeric legacy build id appearing in the depot URL
    pub repository_id: String,
    /// MD5 of the complete blob
    pub blob_md5: String,
    /// Size of the blob in bytes
    pub total_size: u64,
}

impl V1BlobItem {
    /// CDN path of the blob relative to the depot root
    pub fn cdn_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.product_id, self.platform, self.repository_id, V1_BLOB_PATH
        )
    }
}

/// A logical file extracted from a V1 blob by byte range
#[derive(Debug, Clone)]
pub struct V1FileItem {
    /// Logical path of the file
    pub path: String,
    /// Offset of the file inside `main.bin`
    pub offset: u64,
    /// Size of the extracted file in bytes
    pub size: u64,
    /// MD5 of the extracted file
    pub md5: String,
    /// Blob the file lives in
    pub blob: V1BlobItem,
}

/// Byte range of a file inside a Small Files Container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfcRef {
    /// Offset inside the decompressed container
    pub offset: u64,
    /// Length of the member file
    pub size: u64,
}

/// A chunked generation-2 file
#[derive(Debug, Clone)]
pub struct V2FileItem {
    /// Logical path of the file
    pub path: String,
    /// Product the file belongs to
    pub product_id: String,
    /// MD5 of the assembled plaintext, when the manifest declares one
    pub md5: Option<String>,
    /// Ordered chunk list; for SFC members this describes the extracted
    /// file and the chunks may not exist as CDN objects
    pub chunks: Vec<Chunk>,
    /// Set when the file is a member of a Small Files Container
    pub sfc_ref: Option<SfcRef>,
}

impl V2FileItem {
    /// Total uncompressed size, from the sfc slice or the chunk sum
    pub fn total_size(&self) -> u64 {
        if let Some(sfc) = &self.sfc_ref {
            return sfc.size;
        }
        self.chunks.iter().map(|c| c.size_uncompressed).sum()
    }

    /// Whether the file must be materialised out of its container
    pub fn is_in_sfc(&self) -> bool {
        self.sfc_ref.is_some()
    }
}

/// A Small Files Container: a downloadable object whose decompressed body
/// concatenates many small member files
#[derive(Debug, Clone)]
pub struct V2SfcItem {
    /// Product the container belongs to
    pub product_id: String,
    /// Real CDN-addressable chunks of the container
    pub chunks: Vec<Chunk>,
}

/// A zlib-compressed fragment of a V2 file, content-addressed by the MD5 of
/// its compressed bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// MD5 of the compressed bytes; also the CDN path key
    pub md5_compressed: String,
    /// Compressed size in bytes
    pub size_compressed: u64,
    /// MD5 of the decompressed bytes
    pub md5_uncompressed: String,
    /// Decompressed size in bytes
    pub size_uncompressed: u64,
    /// Cumulative compressed offset within the file
    pub offset_compressed: u64,
    /// Cumulative uncompressed offset within the file
    pub offset_uncompressed: u64,
}

/// One file-level differential update between two builds
#[derive(Debug, Clone)]
pub struct FilePatchDiff {
    /// Path of the file in the old build
    pub source_path: String,
    /// Path of the file in the new build
    pub target_path: String,
    /// MD5 of the old file the delta applies to
    pub md5_source: String,
    /// MD5 of the file after applying the delta
    pub md5_target: String,
    /// Ordered delta chunks, fetched from the patch store
    pub chunks: Vec<Chunk>,
    /// Product the diff belongs to
    pub product_id: String,
}

/// All file deltas for one `(from_build, to_build)` pair
#[derive(Debug, Clone)]
pub struct Patch {
    /// Binary diff algorithm; always `xdelta3`
    pub algorithm: String,
    /// Per-file deltas
    pub files: Vec<FilePatchDiff>,
    /// Credential minted for the patch-store secure link
    pub client_id: String,
    /// Credential minted for the patch-store secure link
    pub client_secret: String,
}

/// Result of comparing two builds: four disjoint sets
#[derive(Debug, Clone, Default)]
pub struct ManifestDiff {
    /// Files present only in the new build
    pub new: Vec<DepotItem>,
    /// Files whose content changed and must be re-downloaded in full
    pub changed: Vec<DepotItem>,
    /// Files covered by a differential update
    pub patched: Vec<FilePatchDiff>,
    /// Paths present only in the old build
    pub deleted: Vec<String>,
}
