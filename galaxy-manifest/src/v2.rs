//! Generation-2 wire schema
//!
//! V2 manifests are zlib-compressed JSON, content-addressed under the
//! `v2/meta` CDN root. A repository manifest names its depots; each depot
//! manifest lists chunked items. Patch root and depot-diff manifests share
//! the chunk record shape.

use serde::Deserialize;

/// V2 repository (build root) manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub base_product_id: String,
    #[serde(default)]
    pub build_id: Option<String>,
    #[serde(default)]
    pub install_directory: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub depots: Vec<RepositoryDepot>,
}

/// Depot reference inside a repository manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDepot {
    pub product_id: String,
    /// Content hash of the depot manifest
    pub manifest: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub compressed_size: u64,
    #[serde(default)]
    pub os_bitness: Option<Vec<String>>,
}

/// Decoded depot manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotDetails {
    pub depot: DepotManifest,
}

/// Item table of a depot manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotManifest {
    #[serde(default)]
    pub small_files_container: Option<SmallFilesContainer>,
    pub items: Vec<DepotItemRecord>,
}

/// The depot's Small Files Container, when present
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmallFilesContainer {
    pub chunks: Vec<ChunkRecord>,
}

/// One entry of a depot manifest's item table
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DepotItemRecord {
    /// A downloadable file
    #[serde(rename = "DepotFile", rename_all = "camelCase")]
    File {
        path: String,
        #[serde(default)]
        chunks: Vec<ChunkRecord>,
        #[serde(default)]
        md5: Option<String>,
        #[serde(default)]
        sfc_ref: Option<SfcRefRecord>,
    },
    /// A directory entry, carried for install-tree creation only
    #[serde(rename = "DepotDirectory", rename_all = "camelCase")]
    Directory { path: String },
}

/// Byte range of a file inside the Small Files Container
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SfcRefRecord {
    pub offset: u64,
    pub size: u64,
}

/// One chunk of a file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    /// MD5 of the compressed bytes; the CDN path key
    pub compressed_md5: String,
    pub compressed_size: u64,
    /// MD5 of the decompressed bytes
    pub md5: String,
    pub size: u64,
}

/// Patch root manifest, served at the link from the patches endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRoot {
    pub base_product_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub algorithm: String,
    pub depots: Vec<RepositoryDepot>,
}

/// Decoded per-depot patch manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDepotDetails {
    pub depot: PatchDepotManifest,
}

/// Item table of a patch depot manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDepotManifest {
    pub items: Vec<PatchItemRecord>,
}

/// One file-level diff inside a patch depot manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PatchItemRecord {
    /// An xdelta3 delta between two file revisions
    #[serde(rename = "DepotDiff", rename_all = "camelCase")]
    Diff {
        path_source: String,
        path_target: String,
        md5_source: String,
        md5_target: String,
        #[serde(default)]
        chunks: Vec<ChunkRecord>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn depot_manifest_parses_files_and_sfc() {
        let value = json!({
            "depot": {
                "smallFilesContainer": {
                    "chunks": [{
                        "compressedMd5": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                        "compressedSize": 120,
                        "md5": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                        "size": 419,
                    }],
                },
                "items": [
                    {
                        "type": "DepotFile",
                        "path": "data/a.txt",
                        "sfcRef": {"offset": 0, "size": 178},
                        "chunks": [],
                    },
                    {"type": "DepotDirectory", "path": "data"},
                ],
            },
        });

        let details: DepotDetails = serde_json::from_value(value).unwrap();
        assert!(details.depot.small_files_container.is_some());
        assert_eq!(details.depot.items.len(), 2);
        match &details.depot.items[0] {
            DepotItemRecord::File { sfc_ref, .. } => {
                assert_eq!(sfc_ref.unwrap().size, 178);
            }
            DepotItemRecord::Directory { .. } => panic!("expected file"),
        }
    }

    #[test]
    fn patch_root_parses() {
        let value = json!({
            "baseProductId": "1207658930",
            "clientId": "cid",
            "clientSecret": "csec",
            "algorithm": "xdelta3",
            "depots": [{
                "productId": "1207658930",
                "manifest": "cccccccccccccccccccccccccccccccc",
                "languages": ["*"],
            }],
        });
        let root: PatchRoot = serde_json::from_value(value).unwrap();
        assert_eq!(root.algorithm, "xdelta3");
        assert_eq!(root.depots.len(), 1);
    }
}
