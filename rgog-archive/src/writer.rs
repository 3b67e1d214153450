//! Archive writer: pack a mirrored v2 CDN tree into RGOG parts
//!
//! The writer is deterministic: the same input tree and part-size bound
//! produce byte-identical output on any host. All blobs are stored exactly
//! as they sit in the mirror (no recompression), so every content address
//! inside the archive remains valid.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LE, WriteBytesExt};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use galaxy_client::utils::maybe_inflate;

use crate::format::{
    self, BuildMeta, ChunkMeta, Header, ManifestMeta, SectionRef, Sections, align_up,
};
use crate::languages::pack_languages;
use crate::{Error, Result};

/// Options for [`pack`]
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Bound on the data bytes (BuildFiles + ChunkFiles) of one part
    pub max_part_size: u64,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_part_size: format::DEFAULT_MAX_PART_SIZE,
        }
    }
}

/// What a pack run produced
#[derive(Debug, Clone)]
pub struct PackSummary {
    /// Written part files, part 0 first
    pub parts: Vec<PathBuf>,
    /// Builds recorded in part 0
    pub builds: usize,
    /// Chunks across all parts
    pub chunks: usize,
    /// Data bytes (blobs and chunks) across all parts
    pub data_bytes: u64,
}

/// A meta blob discovered in the input tree
struct MetaBlob {
    hash: String,
    raw_hash: [u8; 16],
    path: PathBuf,
    size: u64,
    json: Value,
}

/// A store chunk discovered in the input tree
struct ChunkBlob {
    hash: String,
    raw_hash: [u8; 16],
    product_id: u64,
    path: PathBuf,
    size: u64,
}

/// One build planned for BuildMetadata
struct PlannedBuild {
    build_id: u64,
    os: u8,
    repo_hash: String,
    manifests: Vec<(String, (u64, u64))>,
}

/// Pack the `v2/meta` and `v2/store` subtrees of `input_root`
///
/// `output` names part 0; it may be given with or without the `.rgog`
/// extension. Further parts land next to it as `{name}.part{n}.rgog`.
pub fn pack(input_root: &Path, output: &Path, options: &PackOptions) -> Result<PackSummary> {
    let meta_blobs = scan_meta(input_root)?;
    let chunk_blobs = scan_store(input_root)?;

    if meta_blobs.is_empty() && chunk_blobs.is_empty() {
        return Err(Error::invalid_input(format!(
            "{} contains no v2/meta or v2/store entries",
            input_root.display()
        )));
    }

    let plan = plan_archive(meta_blobs, chunk_blobs, options.max_part_size)?;
    write_parts(&plan, output)
}

struct ArchivePlan {
    builds: Vec<PlannedBuild>,
    /// BuildFiles blobs in file order: repositories first, then manifests,
    /// each group in ascending hex order
    build_files: Vec<MetaBlob>,
    /// Offset of each blob within BuildFiles, by hash
    blob_offsets: BTreeMap<String, (u64, u64)>,
    build_files_size: u64,
    products: Vec<u64>,
    /// Chunks in global ascending hex order
    chunks: Vec<ChunkBlob>,
    /// Chunk indices per part
    part_chunks: Vec<Vec<usize>>,
}

fn plan_archive(
    meta_blobs: Vec<MetaBlob>,
    mut chunk_blobs: Vec<ChunkBlob>,
    max_part_size: u64,
) -> Result<ArchivePlan> {
    let mut repositories: Vec<MetaBlob> = Vec::new();
    let mut manifests: BTreeMap<String, MetaBlob> = BTreeMap::new();

    for blob in meta_blobs {
        if blob.json.get("depot").is_some() {
            manifests.insert(blob.hash.clone(), blob);
        } else {
            // Repositories, and any meta file no repository references,
            // become build records so the tree round-trips losslessly.
            repositories.push(blob);
        }
    }
    repositories.sort_by(|a, b| a.hash.cmp(&b.hash));

    let mut products: BTreeSet<u64> = BTreeSet::new();
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    let mut builds: Vec<PlannedBuild> = Vec::new();

    for repo in &repositories {
        if let Some(pid) = repo
            .json
            .get("baseProductId")
            .and_then(value_as_u64)
        {
            products.insert(pid);
        }

        let mut entries: Vec<(String, (u64, u64))> = Vec::new();
        if let Some(depots) = repo.json.get("depots").and_then(Value::as_array) {
            for depot in depots {
                let Some(hash) = depot.get("manifest").and_then(Value::as_str) else {
                    continue;
                };
                if !manifests.contains_key(hash) {
                    warn!(
                        "repository {} references manifest {hash} absent from the tree",
                        repo.hash
                    );
                    continue;
                }
                if entries.iter().any(|(h, _)| h == hash) {
                    continue;
                }
                let languages: Vec<String> = depot
                    .get("languages")
                    .and_then(Value::as_array)
                    .map(|l| {
                        l.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                referenced.insert(hash.to_string());
                entries.push((hash.to_string(), pack_languages(&languages)));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        builds.push(PlannedBuild {
            build_id: repo
                .json
                .get("buildId")
                .and_then(value_as_u64)
                .unwrap_or(0),
            os: format::os_code(repo.json.get("platform").and_then(Value::as_str)),
            repo_hash: repo.hash.clone(),
            manifests: entries,
        });
    }

    // Orphan manifests become zero-id builds with no manifest entries so
    // the tree round-trips losslessly.
    let orphan_hashes: Vec<String> = manifests
        .keys()
        .filter(|h| !referenced.contains(*h))
        .cloned()
        .collect();

    let mut build_files: Vec<MetaBlob> = repositories;
    let mut orphan_blobs = Vec::new();
    for hash in &orphan_hashes {
        if let Some(blob) = manifests.remove(hash) {
            debug!("manifest {hash} referenced by no repository; kept as orphan build");
            builds.push(PlannedBuild {
                build_id: 0,
                os: 0,
                repo_hash: blob.hash.clone(),
                manifests: Vec::new(),
            });
            orphan_blobs.push(blob);
        }
    }
    build_files.extend(orphan_blobs);
    build_files.sort_by(|a, b| a.hash.cmp(&b.hash));
    // Repositories grouped before manifests; BTreeMap iteration keeps the
    // manifest group in hex order.
    build_files.extend(manifests.into_values());

    builds.sort_by(|a, b| {
        a.build_id
            .cmp(&b.build_id)
            .then_with(|| a.repo_hash.cmp(&b.repo_hash))
    });
    if builds.len() > usize::from(u16::MAX) {
        return Err(Error::invalid_input("more than 65535 builds"));
    }

    let mut blob_offsets = BTreeMap::new();
    let mut offset = 0u64;
    for blob in &build_files {
        blob_offsets.insert(blob.hash.clone(), (offset, blob.size));
        offset += blob.size;
    }
    let build_files_size = offset;

    // Global order: hex of the content address, then product id for the
    // rare chunk shared verbatim between products.
    chunk_blobs.sort_by(|a, b| {
        a.hash
            .cmp(&b.hash)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    chunk_blobs.dedup_by(|a, b| a.hash == b.hash && a.product_id == b.product_id);
    if chunk_blobs.len() > u32::MAX as usize {
        return Err(Error::invalid_input("more than u32::MAX chunks"));
    }
    for chunk in &chunk_blobs {
        products.insert(chunk.product_id);
    }

    // Walk chunks in global order; a chunk that no longer fits starts the
    // next part. Part 0's data budget is shared with BuildFiles. A chunk
    // larger than the bound occupies a part of its own.
    let mut part_chunks: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut used = build_files_size;
    let mut part_is_empty_of_data = build_files_size == 0;
    for (index, chunk) in chunk_blobs.iter().enumerate() {
        if used + chunk.size > max_part_size && !part_is_empty_of_data {
            part_chunks.push(std::mem::take(&mut current));
            used = 0;
            part_is_empty_of_data = true;
        }
        current.push(index);
        used += chunk.size;
        part_is_empty_of_data = false;
    }
    part_chunks.push(current);

    Ok(ArchivePlan {
        builds,
        build_files,
        blob_offsets,
        build_files_size,
        products: products.into_iter().collect(),
        chunks: chunk_blobs,
        part_chunks,
    })
}

fn write_parts(plan: &ArchivePlan, output: &Path) -> Result<PackSummary> {
    let (dir, base) = split_output(output);
    let total_parts = plan.part_chunks.len() as u32;
    let total_chunks = plan.chunks.len() as u32;
    let mut written = Vec::with_capacity(plan.part_chunks.len());
    let mut data_bytes = 0u64;

    for (part_number, chunk_indices) in plan.part_chunks.iter().enumerate() {
        let part_number = part_number as u32;
        let path = dir.join(format::part_file_name(&base, part_number));
        debug!(
            "writing part {part_number}/{total_parts} to {} ({} chunks)",
            path.display(),
            chunk_indices.len()
        );

        let local_chunks: Vec<&ChunkBlob> =
            chunk_indices.iter().map(|&i| &plan.chunks[i]).collect();
        let chunk_files_size: u64 = local_chunks.iter().map(|c| c.size).sum();
        data_bytes += chunk_files_size;

        // Section sizes drive the offset plan; nothing needs patching
        // afterwards because every size is known before the first byte.
        let product_size = if part_number == 0 {
            4 + 8 * plan.products.len() as u64
        } else {
            0
        };
        let build_meta_size: u64 = if part_number == 0 {
            plan.builds
                .iter()
                .map(|b| {
                    format::BUILD_META_LEN
                        + format::MANIFEST_META_LEN * b.manifests.len() as u64
                })
                .sum()
        } else {
            0
        };
        let build_files_size = if part_number == 0 {
            data_bytes += plan.build_files_size;
            plan.build_files_size
        } else {
            0
        };
        let chunk_meta_size = format::CHUNK_META_LEN * local_chunks.len() as u64;

        let mut cursor = format::HEADER_LEN;
        let mut place = |size: u64| -> SectionRef {
            if size == 0 {
                return SectionRef::default();
            }
            let offset = align_up(cursor);
            cursor = offset + size;
            SectionRef { offset, size }
        };
        let sections = Sections {
            product_metadata: place(product_size),
            build_metadata: place(build_meta_size),
            build_files: place(build_files_size),
            chunk_metadata: place(chunk_meta_size),
            chunk_files: place(chunk_files_size),
        };

        let header = Header {
            archive_type: format::TYPE_BASE,
            part_number,
            total_parts,
            total_build_count: plan.builds.len() as u16,
            total_chunk_count: total_chunks,
            local_chunk_count: local_chunks.len() as u32,
            sections,
        };

        let file = File::create(&path)?;
        let mut writer = CountingWriter::new(BufWriter::new(file));
        header.write_to(&mut writer)?;

        if sections.product_metadata.is_present() {
            writer.pad_to(sections.product_metadata.offset)?;
            writer.write_u32::<LE>(plan.products.len() as u32)?;
            for product in &plan.products {
                writer.write_u64::<LE>(*product)?;
            }
        }

        if sections.build_metadata.is_present() {
            writer.pad_to(sections.build_metadata.offset)?;
            for build in &plan.builds {
                let (repo_offset, repo_size) = plan.blob_offsets[&build.repo_hash];
                let meta = BuildMeta {
                    build_id: build.build_id,
                    os: build.os,
                    repository_id: raw_hash(&build.repo_hash)?,
                    repo_offset,
                    repo_size,
                    manifests: build
                        .manifests
                        .iter()
                        .map(|(hash, languages)| {
                            let (offset, size) = plan.blob_offsets[hash];
                            Ok(ManifestMeta {
                                depot_id: raw_hash(hash)?,
                                offset,
                                size,
                                languages1: languages.0,
                                languages2: languages.1,
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                };
                meta.write_to(&mut writer)?;
            }
        }

        if sections.build_files.is_present() {
            writer.pad_to(sections.build_files.offset)?;
            for blob in &plan.build_files {
                copy_file(&blob.path, &mut writer)?;
            }
        }

        if sections.chunk_metadata.is_present() {
            writer.pad_to(sections.chunk_metadata.offset)?;
            let mut offset = 0u64;
            for chunk in &local_chunks {
                ChunkMeta {
                    md5_compressed: chunk.raw_hash,
                    offset,
                    size: chunk.size,
                    product_id: chunk.product_id,
                }
                .write_to(&mut writer)?;
                offset += chunk.size;
            }
        }

        if sections.chunk_files.is_present() {
            writer.pad_to(sections.chunk_files.offset)?;
            for chunk in &local_chunks {
                copy_file(&chunk.path, &mut writer)?;
            }
        }

        writer.into_inner().flush()?;
        written.push(path);
    }

    info!(
        "packed {} builds and {} chunks into {} part(s)",
        plan.builds.len(),
        plan.chunks.len(),
        written.len()
    );

    Ok(PackSummary {
        parts: written,
        builds: plan.builds.len(),
        chunks: plan.chunks.len(),
        data_bytes,
    })
}

fn split_output(output: &Path) -> (PathBuf, String) {
    let dir = output
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let base = name.strip_suffix(".rgog").unwrap_or(&name).to_string();
    (dir, base)
}

fn scan_meta(input_root: &Path) -> Result<Vec<MetaBlob>> {
    let meta_root = input_root.join("v2").join("meta");
    let mut blobs: BTreeMap<String, MetaBlob> = BTreeMap::new();

    if !meta_root.is_dir() {
        return Ok(Vec::new());
    }

    for entry in WalkDir::new(&meta_root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::invalid_input(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let hash = file_hash_name(entry.path())?;
        let bytes = std::fs::read(entry.path())?;
        let decoded = maybe_inflate(bytes.clone())
            .map_err(|e| Error::invalid_input(format!("{hash}: {e}")))?;
        let json: Value = serde_json::from_slice(&decoded)
            .map_err(|e| Error::invalid_input(format!("{hash}: not JSON: {e}")))?;

        blobs.entry(hash.clone()).or_insert(MetaBlob {
            raw_hash: raw_hash(&hash)?,
            hash,
            path: entry.path().to_path_buf(),
            size: bytes.len() as u64,
            json,
        });
    }

    Ok(blobs.into_values().collect())
}

fn scan_store(input_root: &Path) -> Result<Vec<ChunkBlob>> {
    let store_root = input_root.join("v2").join("store");
    let mut chunks = Vec::new();

    if !store_root.is_dir() {
        return Ok(Vec::new());
    }

    for product_entry in std::fs::read_dir(&store_root)? {
        let product_entry = product_entry?;
        if !product_entry.file_type()?.is_dir() {
            continue;
        }
        let product_name = product_entry.file_name().to_string_lossy().into_owned();
        let product_id: u64 = product_name.parse().map_err(|_| {
            Error::invalid_input(format!("store directory {product_name} is not a product id"))
        })?;

        for entry in WalkDir::new(product_entry.path()).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::invalid_input(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let hash = file_hash_name(entry.path())?;
            chunks.push(ChunkBlob {
                raw_hash: raw_hash(&hash)?,
                hash,
                product_id,
                path: entry.path().to_path_buf(),
                size: entry.metadata().map_err(|e| Error::Io(e.into()))?.len(),
            });
        }
    }

    Ok(chunks)
}

fn file_hash_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid_input(format!("{} has no name", path.display())))?;
    if name.len() != 32 || !name.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::invalid_input(format!(
            "{name} is not a 32-hex content address"
        )));
    }
    Ok(name.to_ascii_lowercase())
}

fn raw_hash(hash: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(hash)
        .map_err(|_| Error::invalid_input(format!("{hash} is not hex")))?;
    bytes
        .try_into()
        .map_err(|_| Error::invalid_input(format!("{hash} is not 16 bytes")))
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn copy_file<W: Write>(path: &Path, writer: &mut W) -> Result<()> {
    let mut file = File::open(path)?;
    std::io::copy(&mut file, writer)?;
    Ok(())
}

/// Writer that tracks its absolute offset so sections can be padded to
/// their planned starts
struct CountingWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    fn pad_to(&mut self, target: u64) -> Result<()> {
        debug_assert!(target >= self.position);
        const ZEROES: [u8; 64] = [0u8; 64];
        let mut remaining = target - self.position;
        while remaining > 0 {
            let n = remaining.min(ZEROES.len() as u64) as usize;
            self.inner.write_all(&ZEROES[..n])?;
            self.position += n as u64;
            remaining -= n as u64;
        }
        Ok(())
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
