//! Archive extraction: unpack the mirrored tree or reassemble game files
//!
//! `unpack` is the bitwise inverse of pack: blobs come back out exactly as
//! stored, at their content-addressed paths. `extract --reassemble` walks
//! the depot manifests instead and materialises the logical file tree,
//! slicing Small Files Container members out of their container.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use galaxy_client::utils::{galaxy_path, inflate, is_zlib};
use galaxy_manifest::resolver::parse_depot_items;
use galaxy_manifest::{DepotItem, v2};

use crate::format::BuildMeta;
use crate::reader::Archive;
use crate::{Error, Result};

/// Options for [`unpack`]
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    /// Also write pretty-printed JSON copies under `{out}/debug/`
    pub debug: bool,
    /// Skip the meta tree and write chunks only
    pub chunks_only: bool,
}

/// Options for [`extract`]
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Restrict to one build id
    pub build_id: Option<u64>,
    /// Reassemble logical files instead of the CDN tree
    pub reassemble: bool,
    /// CDN-tree mode: write only the chunks the selection references
    pub chunks_only: bool,
}

/// Write the archive back out as a v2 CDN mirror
///
/// `unpack(pack(tree))` reproduces `tree` byte-for-byte for the
/// `v2/meta/**` and `v2/store/**` subtrees.
pub fn unpack(archive: &Archive, out_dir: &Path, options: &UnpackOptions) -> Result<()> {
    if !options.chunks_only {
        let mut written = BTreeSet::new();
        for build in archive.builds() {
            write_meta_blob(
                archive,
                out_dir,
                build.repository_id,
                build.repo_offset,
                build.repo_size,
                options.debug,
                &mut written,
            )?;
            for manifest in &build.manifests {
                write_meta_blob(
                    archive,
                    out_dir,
                    manifest.depot_id,
                    manifest.offset,
                    manifest.size,
                    options.debug,
                    &mut written,
                )?;
            }
        }
    }

    let mut count = 0usize;
    for (hash, location) in archive.chunks() {
        let bytes = archive.read_chunk(hash)?;
        let path = out_dir
            .join("v2/store")
            .join(location.product_id.to_string())
            .join(galaxy_path(&hex::encode(hash)));
        write_file(&path, &bytes)?;
        count += 1;
    }

    info!("unpacked {count} chunks to {}", out_dir.display());
    Ok(())
}

/// Extract builds from the archive
///
/// Without `reassemble` this writes the CDN tree of the selected builds;
/// with it, the logical game files, verified against their manifest MD5s.
pub fn extract(archive: &Archive, out_dir: &Path, options: &ExtractOptions) -> Result<()> {
    let builds: Vec<&BuildMeta> = match options.build_id {
        Some(build_id) => vec![archive.find_build(build_id)?],
        None => archive.builds().iter().collect(),
    };

    if options.reassemble {
        for build in &builds {
            reassemble_build(archive, build, out_dir)?;
        }
        return Ok(());
    }

    let mut written = BTreeSet::new();
    let mut chunk_hashes: BTreeSet<[u8; 16]> = BTreeSet::new();
    for build in &builds {
        if !options.chunks_only {
            write_meta_blob(
                archive,
                out_dir,
                build.repository_id,
                build.repo_offset,
                build.repo_size,
                false,
                &mut written,
            )?;
        }
        for manifest in &build.manifests {
            if !options.chunks_only {
                write_meta_blob(
                    archive,
                    out_dir,
                    manifest.depot_id,
                    manifest.offset,
                    manifest.size,
                    false,
                    &mut written,
                )?;
            }
            let details = read_depot_details(archive, manifest.offset, manifest.size)?;
            collect_chunk_hashes(&details, &mut chunk_hashes)?;
        }
    }

    for hash in &chunk_hashes {
        match archive.locate_chunk(hash) {
            Ok(location) => {
                let bytes = archive.read_chunk(hash)?;
                let path = out_dir
                    .join("v2/store")
                    .join(location.product_id.to_string())
                    .join(galaxy_path(&hex::encode(hash)));
                write_file(&path, &bytes)?;
            }
            // Advisory chunks of container members need not be archived.
            Err(Error::NotFound { .. }) => {
                debug!("chunk {} not in archive, skipping", hex::encode(hash));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn reassemble_build(archive: &Archive, build: &BuildMeta, out_dir: &Path) -> Result<()> {
    let repo_bytes = archive.read_build_blob(build.repo_offset, build.repo_size)?;
    let repo_json = decode_json(&repo_bytes)?;
    if repo_json.get("depots").is_none() {
        debug!(
            "record {} is not a repository, nothing to reassemble",
            hex::encode(build.repository_id)
        );
        return Ok(());
    }
    let repository: v2::Repository = serde_json::from_value(repo_json)?;

    info!(
        "reassembling build {} ({} depots)",
        build.build_id,
        repository.depots.len()
    );

    for depot in &repository.depots {
        let raw = hex_to_raw(&depot.manifest)?;
        let Some(manifest) = build.manifests.iter().find(|m| m.depot_id == raw) else {
            warn!(
                "depot manifest {} missing from archive, skipping depot",
                depot.manifest
            );
            continue;
        };
        let details = read_depot_details(archive, manifest.offset, manifest.size)?;
        let items = parse_depot_items(&details, &depot.product_id);

        // The container, when present, is first; members slice from it.
        let mut container: Option<Vec<u8>> = None;
        for item in &items {
            match item {
                DepotItem::V2Sfc(sfc) => {
                    let mut buffer = Vec::new();
                    for chunk in &sfc.chunks {
                        let compressed = archive.read_chunk(&hex_to_raw(&chunk.md5_compressed)?)?;
                        buffer.extend_from_slice(&inflate(&compressed).map_err(client_err)?);
                    }
                    container = Some(buffer);
                }
                DepotItem::V2File(file) => {
                    let target = out_dir.join(&file.path);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }

                    let mut hasher = md5::Context::new();
                    let mut out = File::create(&target)?;
                    if let Some(sfc_ref) = file.sfc_ref {
                        let container = container.as_deref().ok_or_else(|| {
                            Error::invalid_archive(format!(
                                "{} references a container the depot does not declare",
                                file.path
                            ))
                        })?;
                        let start = sfc_ref.offset as usize;
                        let end = start + sfc_ref.size as usize;
                        let body = container.get(start..end).ok_or_else(|| {
                            Error::invalid_archive(format!(
                                "{} slice exceeds container bounds",
                                file.path
                            ))
                        })?;
                        hasher.consume(body);
                        out.write_all(body)?;
                    } else {
                        for chunk in &file.chunks {
                            let compressed =
                                archive.read_chunk(&hex_to_raw(&chunk.md5_compressed)?)?;
                            let plain = inflate(&compressed).map_err(client_err)?;
                            hasher.consume(&plain);
                            out.write_all(&plain)?;
                        }
                    }
                    out.flush()?;

                    if let Some(expected) = &file.md5 {
                        let actual = hex::encode(hasher.finalize().0);
                        if actual != *expected {
                            return Err(Error::hash_mismatch(&file.path, expected, actual));
                        }
                    }
                }
                DepotItem::V1Blob(_) | DepotItem::V1File(_) => {}
            }
        }
    }

    Ok(())
}

fn collect_chunk_hashes(
    details: &v2::DepotDetails,
    hashes: &mut BTreeSet<[u8; 16]>,
) -> Result<()> {
    if let Some(sfc) = &details.depot.small_files_container {
        for chunk in &sfc.chunks {
            hashes.insert(hex_to_raw(&chunk.compressed_md5)?);
        }
    }
    for item in &details.depot.items {
        if let v2::DepotItemRecord::File { chunks, .. } = item {
            for chunk in chunks {
                hashes.insert(hex_to_raw(&chunk.compressed_md5)?);
            }
        }
    }
    Ok(())
}

fn read_depot_details(archive: &Archive, offset: u64, size: u64) -> Result<v2::DepotDetails> {
    let blob = archive.read_build_blob(offset, size)?;
    let json = decode_json(&blob)?;
    Ok(serde_json::from_value(json)?)
}

fn client_err(e: galaxy_client::Error) -> Error {
    match e {
        galaxy_client::Error::Io(io) => Error::Io(io),
        other => Error::invalid_archive(other.to_string()),
    }
}

fn decode_json(blob: &[u8]) -> Result<Value> {
    let decoded = if is_zlib(blob) {
        inflate(blob).map_err(client_err)?
    } else {
        blob.to_vec()
    };
    Ok(serde_json::from_slice(&decoded)?)
}

fn hex_to_raw(hash: &str) -> Result<[u8; 16]> {
    hex::decode(hash)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| Error::invalid_archive(format!("{hash} is not a 32-hex address")))
}

#[allow(clippy::too_many_arguments)]
fn write_meta_blob(
    archive: &Archive,
    out_dir: &Path,
    hash: [u8; 16],
    offset: u64,
    size: u64,
    debug_copy: bool,
    written: &mut BTreeSet<[u8; 16]>,
) -> Result<()> {
    if !written.insert(hash) {
        return Ok(());
    }
    let bytes = archive.read_build_blob(offset, size)?;
    let hex_hash = hex::encode(hash);
    let path = out_dir.join("v2/meta").join(galaxy_path(&hex_hash));
    write_file(&path, &bytes)?;

    if debug_copy {
        let json = decode_json(&bytes)?;
        let kind = if json.get("depot").is_some() {
            "manifest"
        } else {
            "repository"
        };
        let debug_path = out_dir.join("debug").join(format!("{hex_hash}_{kind}.json"));
        write_file(&debug_path, serde_json::to_string_pretty(&json)?.as_bytes())?;
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}
