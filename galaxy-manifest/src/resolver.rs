//! Build discovery and manifest normalisation
//!
//! Resolves a `(product, build-selector, platform)` triple into a
//! normalised [`Manifest`], handling both manifest generations, the
//! builds-endpoint union listing, and the direct path for delisted builds.

use chrono::{DateTime, Utc};
use galaxy_client::ApiClient;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::types::{
    Chunk, Depot, DepotItem, DepotSource, Manifest, SfcRef, V1BlobItem, V1FileItem, V2FileItem,
    V2SfcItem,
};
use crate::{Error, Result, v1, v2};

/// One entry of the builds listing
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// User-facing build id
    pub build_id: String,
    /// Product the build belongs to
    pub product_id: String,
    /// Manifest generation of this build
    pub generation: u32,
    /// Publication timestamp, when the endpoint provides one
    pub date_published: Option<DateTime<Utc>>,
    /// Human-readable version string
    pub version_name: Option<String>,
    /// Numeric legacy build id (generation 1 only)
    pub legacy_build_id: Option<u64>,
    /// Exact manifest URL (generation 2 only)
    pub link: Option<String>,
    /// Platform the build targets
    pub platform: String,
}

/// Direct-access source for delisted or cached builds
#[derive(Debug, Clone)]
pub enum DirectSource {
    /// Generation-1 legacy build id
    RepositoryId(String),
    /// Generation-2 manifest URL
    ManifestLink(String),
}

/// Resolves builds and manifests for one API client
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    api: ApiClient,
}

impl ManifestResolver {
    /// Create a resolver over the given API client
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// The API client this resolver queries
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// List builds of both generations, deduplicated by build id and
    /// sorted by publication date, newest first
    pub async fn list_all_builds(&self, product_id: &str, platform: &str) -> Result<Vec<BuildInfo>> {
        let mut builds = Vec::new();
        for generation in [2u32, 1] {
            match self.api.builds(product_id, platform, generation).await {
                Ok(response) => {
                    builds.extend(parse_builds(&response, product_id, platform));
                }
                Err(galaxy_client::Error::NotFound { .. }) => {
                    trace!("no generation-{generation} builds for {product_id}");
                }
                Err(e) => return Err(e.into()),
            }
        }

        builds.sort_by(|a, b| b.date_published.cmp(&a.date_published));
        let mut seen = std::collections::HashSet::new();
        builds.retain(|b| seen.insert(b.build_id.clone()));

        debug!(
            "{} builds listed for {product_id}/{platform}",
            builds.len()
        );
        Ok(builds)
    }

    /// Resolve the newest build for a product and platform
    ///
    /// Prefers generation 2; falls back to generation 1 when no modern
    /// build exists.
    pub async fn resolve_latest(&self, product_id: &str, platform: &str) -> Result<Manifest> {
        let builds = self.list_all_builds(product_id, platform).await?;
        let latest = builds
            .iter()
            .find(|b| b.generation == 2)
            .or_else(|| builds.first())
            .ok_or_else(|| Error::not_found(format!("builds of {product_id}/{platform}")))?;
        self.resolve_build(latest).await
    }

    /// Resolve a specific build id
    ///
    /// A build id absent from both generation listings is `NotFound`;
    /// the resolver never guesses a generation.
    pub async fn resolve_by_build_id(
        &self,
        product_id: &str,
        build_id: &str,
        platform: &str,
    ) -> Result<Manifest> {
        let builds = self.list_all_builds(product_id, platform).await?;
        let found = builds
            .iter()
            .find(|b| b.build_id == build_id)
            .ok_or_else(|| Error::not_found(format!("build {build_id} of {product_id}")))?;
        self.resolve_build(found).await
    }

    /// Resolve by position in the newest-first builds listing
    ///
    /// Legacy selector: a numeric string is treated as an index.
    pub async fn resolve_by_index(
        &self,
        product_id: &str,
        index: usize,
        platform: &str,
    ) -> Result<Manifest> {
        let builds = self.list_all_builds(product_id, platform).await?;
        let found = builds
            .get(index)
            .ok_or_else(|| Error::not_found(format!("build index {index} of {product_id}")))?;
        self.resolve_build(found).await
    }

    /// Resolve without hitting the builds endpoint
    ///
    /// Direct path for delisted content where the caller already knows the
    /// repository id (generation 1) or manifest URL (generation 2).
    pub async fn resolve_direct(
        &self,
        product_id: &str,
        generation: u32,
        source: DirectSource,
        platform: &str,
    ) -> Result<Manifest> {
        match (generation, source) {
            (1, DirectSource::RepositoryId(repository_id)) => {
                self.resolve_v1(product_id, platform, &repository_id, None)
                    .await
            }
            (2, DirectSource::ManifestLink(link)) => {
                self.resolve_v2(product_id, platform, &link, None).await
            }
            (generation, source) => Err(Error::invalid_manifest(
                product_id,
                format!("generation {generation} cannot resolve from {source:?}"),
            )),
        }
    }

    /// Fetch and normalise the manifest behind one builds-listing entry
    pub async fn resolve_build(&self, build: &BuildInfo) -> Result<Manifest> {
        match build.generation {
            2 => {
                let link = build.link.as_deref().ok_or_else(|| {
                    Error::invalid_manifest(&build.build_id, "generation-2 build without link")
                })?;
                self.resolve_v2(
                    &build.product_id,
                    &build.platform,
                    link,
                    Some(build.build_id.clone()),
                )
                .await
            }
            1 => {
                let repository_id = build
                    .legacy_build_id
                    .map(|id| id.to_string())
                    .ok_or_else(|| {
                        Error::invalid_manifest(
                            &build.build_id,
                            "generation-1 build without legacy_build_id",
                        )
                    })?;
                self.resolve_v1(
                    &build.product_id,
                    &build.platform,
                    &repository_id,
                    Some(build.build_id.clone()),
                )
                .await
            }
            other => Err(Error::unsupported(format!("manifest generation {other}"))),
        }
    }

    async fn resolve_v2(
        &self,
        _product_id: &str,
        platform: &str,
        link: &str,
        build_id: Option<String>,
    ) -> Result<Manifest> {
        let raw = self.api.manifest_at(link).await?;
        let repo: v2::Repository = serde_json::from_value(raw.clone())
            .map_err(|e| Error::invalid_manifest(link, e.to_string()))?;

        let depots = repo
            .depots
            .iter()
            .map(|d| Depot {
                product_id: d.product_id.clone(),
                languages: d.languages.clone(),
                size: d.size,
                compressed_size: d.compressed_size,
                bitness: parse_bitness(d.os_bitness.as_deref()),
                source: DepotSource::V2 {
                    manifest: d.manifest.clone(),
                },
            })
            .collect();

        Ok(Manifest {
            base_product_id: repo.base_product_id.clone(),
            build_id: build_id
                .or_else(|| repo.build_id.clone())
                .unwrap_or_default(),
            repository_id: None,
            generation: 2,
            platform: repo.platform.unwrap_or_else(|| platform.to_string()),
            install_directory: repo.install_directory,
            depots,
            dependencies: repo.dependencies,
            raw,
        })
    }

    async fn resolve_v1(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        build_id: Option<String>,
    ) -> Result<Manifest> {
        let raw = self
            .api
            .v1_manifest(product_id, platform, repository_id, "repository")
            .await?;
        let repo: v1::Repository = serde_json::from_value(raw.clone())
            .map_err(|e| Error::invalid_manifest(repository_id, e.to_string()))?;

        let blob_md5 = repo.depot.md5.clone().ok_or_else(|| {
            Error::invalid_manifest(repository_id, "generation-1 depot without blob md5")
        })?;
        let blob = V1BlobItem {
            product_id: product_id.to_string(),
            platform: platform.to_string(),
            repository_id: repository_id.to_string(),
            blob_md5,
            total_size: repo.depot.size,
        };

        let files = repo
            .files
            .iter()
            .map(|f| V1FileItem {
                path: normalize_path(&f.path),
                offset: f.offset,
                size: f.size,
                md5: f.hash.clone(),
                blob: blob.clone(),
            })
            .collect();

        let languages = if repo.depot.languages.is_empty() {
            vec!["*".to_string()]
        } else {
            repo.depot.languages.clone()
        };

        let depot = Depot {
            product_id: product_id.to_string(),
            languages,
            size: repo.depot.size,
            compressed_size: repo.depot.compressed_size.unwrap_or(repo.depot.size),
            bitness: None,
            source: DepotSource::V1 { blob, files },
        };

        Ok(Manifest {
            base_product_id: product_id.to_string(),
            build_id: build_id.unwrap_or_else(|| repository_id.to_string()),
            repository_id: Some(repository_id.to_string()),
            generation: 1,
            platform: platform.to_string(),
            install_directory: repo.install_directory.unwrap_or_default(),
            depots: vec![depot],
            dependencies: repo.dependencies,
            raw,
        })
    }

    /// Fetch and parse the items of one depot
    ///
    /// Generation-2 depots are fetched lazily here; generation-1 file
    /// tables were already parsed with the repository. When the depot
    /// declares a Small Files Container its item is prepended, and member
    /// files keep their advisory chunk lists.
    pub async fn depot_items(&self, depot: &Depot) -> Result<Vec<DepotItem>> {
        match &depot.source {
            DepotSource::V1 { files, .. } => {
                Ok(files.iter().cloned().map(DepotItem::V1File).collect())
            }
            DepotSource::V2 { manifest } => {
                let value = self.api.v2_manifest(manifest).await?;
                let details: v2::DepotDetails = serde_json::from_value(value)
                    .map_err(|e| Error::invalid_manifest(manifest, e.to_string()))?;
                Ok(parse_depot_items(&details, &depot.product_id))
            }
        }
    }
}

/// Convert a depot manifest into normalised items
pub fn parse_depot_items(details: &v2::DepotDetails, product_id: &str) -> Vec<DepotItem> {
    let mut items = Vec::with_capacity(details.depot.items.len() + 1);

    if let Some(sfc) = &details.depot.small_files_container {
        items.push(DepotItem::V2Sfc(V2SfcItem {
            product_id: product_id.to_string(),
            chunks: chunks_with_offsets(&sfc.chunks),
        }));
    }

    for record in &details.depot.items {
        match record {
            v2::DepotItemRecord::File {
                path,
                chunks,
                md5,
                sfc_ref,
            } => {
                items.push(DepotItem::V2File(V2FileItem {
                    path: normalize_path(path),
                    product_id: product_id.to_string(),
                    md5: md5.clone(),
                    chunks: chunks_with_offsets(chunks),
                    sfc_ref: sfc_ref.as_ref().map(|r| SfcRef {
                        offset: r.offset,
                        size: r.size,
                    }),
                }));
            }
            v2::DepotItemRecord::Directory { path } => {
                trace!("skipping directory entry {path}");
            }
        }
    }

    items
}

/// Compute cumulative offsets by prefix-sum over the chunk sizes
pub fn chunks_with_offsets(records: &[v2::ChunkRecord]) -> Vec<Chunk> {
    let mut offset_compressed = 0u64;
    let mut offset_uncompressed = 0u64;
    records
        .iter()
        .map(|r| {
            let chunk = Chunk {
                md5_compressed: r.compressed_md5.clone(),
                size_compressed: r.compressed_size,
                md5_uncompressed: r.md5.clone(),
                size_uncompressed: r.size,
                offset_compressed,
                offset_uncompressed,
            };
            offset_compressed += r.compressed_size;
            offset_uncompressed += r.size;
            chunk
        })
        .collect()
}

/// Normalise manifest path separators to `/`
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .to_string()
}

fn parse_bitness(values: Option<&[String]>) -> Option<Vec<u32>> {
    let values = values?;
    let parsed: Vec<u32> = values.iter().filter_map(|v| v.parse().ok()).collect();
    if parsed.is_empty() { None } else { Some(parsed) }
}

/// Parse one builds-endpoint response into listing entries
fn parse_builds(response: &Value, product_id: &str, platform: &str) -> Vec<BuildInfo> {
    let Some(items) = response.get("items").and_then(Value::as_array) else {
        warn!("builds response for {product_id} without items array");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let build_id = string_or_number(item.get("build_id")?)?;
            let generation = item.get("generation").and_then(Value::as_u64).unwrap_or(2) as u32;
            Some(BuildInfo {
                build_id,
                product_id: item
                    .get("product_id")
                    .and_then(string_or_number)
                    .unwrap_or_else(|| product_id.to_string()),
                generation,
                date_published: item
                    .get("date_published")
                    .and_then(Value::as_str)
                    .and_then(parse_date),
                version_name: item
                    .get("version_name")
                    .and_then(Value::as_str)
                    .map(String::from),
                legacy_build_id: item.get("legacy_build_id").and_then(Value::as_u64),
                link: item.get("link").and_then(Value::as_str).map(String::from),
                platform: item
                    .get("os")
                    .and_then(Value::as_str)
                    .unwrap_or(platform)
                    .to_string(),
            })
        })
        .collect()
}

fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_parse_handles_both_generations() {
        let response = json!({
            "items": [
                {
                    "build_id": "55136646198558648",
                    "generation": 2,
                    "date_published": "2021-12-02T14:45:22+0000",
                    "link": "https://cdn.example.com/content-system/v2/meta/aa/bb/aabb",
                },
                {
                    "build_id": 12345,
                    "generation": 1,
                    "legacy_build_id": 2_000_000_001u64,
                    "date_published": "2015-01-01T00:00:00+0000",
                },
            ],
        });

        let builds = parse_builds(&response, "10", "windows");
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].generation, 2);
        assert_eq!(builds[1].build_id, "12345");
        assert_eq!(builds[1].legacy_build_id, Some(2_000_000_001));
    }

    #[test]
    fn chunk_offsets_are_contiguous_prefix_sums() {
        let records = vec![
            v2::ChunkRecord {
                compressed_md5: "a".repeat(32),
                compressed_size: 100,
                md5: "b".repeat(32),
                size: 250,
            },
            v2::ChunkRecord {
                compressed_md5: "c".repeat(32),
                compressed_size: 40,
                md5: "d".repeat(32),
                size: 90,
            },
        ];

        let chunks = chunks_with_offsets(&records);
        assert_eq!(chunks[0].offset_compressed, 0);
        assert_eq!(chunks[0].offset_uncompressed, 0);
        assert_eq!(chunks[1].offset_compressed, 100);
        assert_eq!(chunks[1].offset_uncompressed, 250);
    }

    #[test]
    fn windows_paths_are_normalised() {
        assert_eq!(normalize_path("data\\bin\\game.exe"), "data/bin/game.exe");
        assert_eq!(normalize_path("/data/a"), "data/a");
    }
}
