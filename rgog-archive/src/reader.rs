//! Archive reader: open parts, index chunks, verify
//!
//! Part 0 carries all metadata; sibling parts contribute chunk payloads.
//! A merged index maps every content address to `(part, offset, size)` so
//! chunk lookups are `O(log n)` regardless of how the archive was split.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LE, ReadBytesExt};
use tracing::{debug, trace};

use galaxy_client::utils::md5_hex;

use crate::format::{self, BuildMeta, ChunkMeta, Header};
use crate::languages::unpack_languages;
use crate::{Error, Result};

/// Where one chunk lives across the part files
#[derive(Debug, Clone, Copy)]
pub struct ChunkLocation {
    /// Part file holding the chunk
    pub part: u32,
    /// Absolute offset within that part file
    pub offset: u64,
    /// Compressed size
    pub size: u64,
    /// Owning product id
    pub product_id: u64,
}

/// Aggregate numbers for `info --stats`
#[derive(Debug, Clone)]
pub struct ArchiveStats {
    /// Number of part files
    pub parts: u32,
    /// Builds recorded in part 0
    pub builds: usize,
    /// Product ids present
    pub products: Vec<u64>,
    /// Chunks across all parts
    pub chunks: usize,
    /// Compressed chunk bytes across all parts
    pub chunk_bytes: u64,
    /// Repository and manifest blob bytes
    pub build_files_bytes: u64,
}

/// One row of the build listing
#[derive(Debug, Clone)]
pub struct BuildSummary {
    /// Numeric build id (zero for orphan records)
    pub build_id: u64,
    /// Platform name decoded from the OS code
    pub os: &'static str,
    /// Repository blob hash, lowercase hex
    pub repository: String,
    /// Depot manifest count
    pub manifest_count: usize,
    /// Union of the manifest language bit-sets
    pub languages: Vec<&'static str>,
}

/// An opened multi-part archive
pub struct Archive {
    part_paths: Vec<PathBuf>,
    part_headers: Vec<Header>,
    builds: Vec<BuildMeta>,
    products: Vec<u64>,
    /// Every ChunkMetadata entry in archive order; a chunk shared between
    /// products appears once per product
    chunk_entries: Vec<([u8; 16], ChunkLocation)>,
    chunk_index: BTreeMap<[u8; 16], ChunkLocation>,
}

impl Archive {
    /// Open part 0 and every sibling part it declares
    pub fn open(part0: &Path) -> Result<Self> {
        let mut file = File::open(part0)?;
        let file_len = file.metadata()?.len();
        let header = Header::read_from(&mut file)?;
        if header.part_number != 0 {
            return Err(Error::invalid_archive(format!(
                "{} is part {}, not part 0",
                part0.display(),
                header.part_number
            )));
        }
        validate_bounds(&header, file_len)?;

        let products = read_products(&mut file, &header)?;
        let builds = read_builds(&mut file, &header)?;

        let mut part_paths = vec![part0.to_path_buf()];
        let mut part_headers = vec![header];
        let mut chunk_entries = Vec::new();
        index_chunks(&mut file, &header, 0, &mut chunk_entries)?;

        let (dir, base) = base_name(part0)?;
        for part_number in 1..header.total_parts {
            let path = dir.join(format::part_file_name(&base, part_number));
            let mut part_file = File::open(&path).map_err(|e| {
                Error::invalid_archive(format!("missing part {part_number}: {e}"))
            })?;
            let part_len = part_file.metadata()?.len();
            let part_header = Header::read_from(&mut part_file)?;
            if part_header.part_number != part_number
                || part_header.total_parts != header.total_parts
                || part_header.total_chunk_count != header.total_chunk_count
            {
                return Err(Error::invalid_archive(format!(
                    "part {part_number} header disagrees with part 0"
                )));
            }
            validate_bounds(&part_header, part_len)?;
            index_chunks(&mut part_file, &part_header, part_number, &mut chunk_entries)?;

            part_paths.push(path);
            part_headers.push(part_header);
        }

        if chunk_entries.len() as u32 != header.total_chunk_count {
            return Err(Error::invalid_archive(format!(
                "metadata holds {} chunk entries, header declares {}",
                chunk_entries.len(),
                header.total_chunk_count
            )));
        }
        let chunk_index: BTreeMap<[u8; 16], ChunkLocation> =
            chunk_entries.iter().map(|(h, l)| (*h, *l)).collect();

        debug!(
            "opened archive: {} part(s), {} builds, {} chunks",
            part_headers.len(),
            builds.len(),
            chunk_entries.len()
        );

        Ok(Self {
            part_paths,
            part_headers,
            builds,
            products,
            chunk_entries,
            chunk_index,
        })
    }

    /// Part 0 header
    pub fn header(&self) -> &Header {
        &self.part_headers[0]
    }

    /// Builds recorded in part 0, ascending by build id
    pub fn builds(&self) -> &[BuildMeta] {
        &self.builds
    }

    /// Product ids recorded in part 0
    pub fn products(&self) -> &[u64] {
        &self.products
    }

    /// Locate a build by its numeric id
    pub fn find_build(&self, build_id: u64) -> Result<&BuildMeta> {
        self.builds
            .iter()
            .find(|b| b.build_id == build_id)
            .ok_or_else(|| Error::not_found(format!("build {build_id}")))
    }

    /// Every chunk entry in archive order, one per `(address, product)`
    pub fn chunks(&self) -> impl Iterator<Item = (&[u8; 16], &ChunkLocation)> {
        self.chunk_entries.iter().map(|(h, l)| (h, l))
    }

    /// Look up one chunk by its raw content address
    pub fn locate_chunk(&self, md5_compressed: &[u8; 16]) -> Result<ChunkLocation> {
        self.chunk_index
            .get(md5_compressed)
            .copied()
            .ok_or_else(|| Error::not_found(format!("chunk {}", hex::encode(md5_compressed))))
    }

    /// Read one chunk's compressed bytes
    pub fn read_chunk(&self, md5_compressed: &[u8; 16]) -> Result<Vec<u8>> {
        let location = self.locate_chunk(md5_compressed)?;
        let mut file = File::open(&self.part_paths[location.part as usize])?;
        read_exact_at(&mut file, location.offset, location.size)
    }

    /// Read a blob out of part 0's BuildFiles section
    pub fn read_build_blob(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let section = self.header().sections.build_files;
        if offset + size > section.size {
            return Err(Error::invalid_archive(format!(
                "build blob [{offset}, +{size}) exceeds BuildFiles size {}",
                section.size
            )));
        }
        let mut file = File::open(&self.part_paths[0])?;
        read_exact_at(&mut file, section.offset + offset, size)
    }

    /// Human-oriented build listing
    pub fn list(&self) -> Vec<BuildSummary> {
        self.builds
            .iter()
            .map(|b| {
                let (mut low, mut high) = (0u64, 0u64);
                for manifest in &b.manifests {
                    low |= manifest.languages1;
                    high |= manifest.languages2;
                }
                BuildSummary {
                    build_id: b.build_id,
                    os: format::os_name(b.os),
                    repository: hex::encode(b.repository_id),
                    manifest_count: b.manifests.len(),
                    languages: unpack_languages(low, high),
                }
            })
            .collect()
    }

    /// Aggregate statistics
    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats {
            parts: self.part_headers.len() as u32,
            builds: self.builds.len(),
            products: self.products.clone(),
            chunks: self.chunk_entries.len(),
            chunk_bytes: self.chunk_entries.iter().map(|(_, c)| c.size).sum(),
            build_files_bytes: self.header().sections.build_files.size,
        }
    }

    /// Validate the archive
    ///
    /// Quick mode checks structure only: magic, version, section bounds and
    /// declared counts (all re-checked on open). Full mode additionally
    /// re-hashes every chunk and build blob against its content address.
    pub fn verify(&self, quick: bool) -> Result<()> {
        for (number, (path, header)) in
            self.part_paths.iter().zip(&self.part_headers).enumerate()
        {
            let len = File::open(path)?.metadata()?.len();
            validate_bounds(header, len)?;
            let expected = format::CHUNK_META_LEN * u64::from(header.local_chunk_count);
            if header.sections.chunk_metadata.size != expected {
                return Err(Error::invalid_archive(format!(
                    "part {number}: ChunkMetadata size {} does not match {} chunks",
                    header.sections.chunk_metadata.size, header.local_chunk_count
                )));
            }
        }

        if quick {
            return Ok(());
        }

        for (hash, location) in &self.chunk_entries {
            let bytes = self.read_chunk(hash)?;
            let actual = md5_hex(&bytes);
            let expected = hex::encode(hash);
            if actual != expected {
                return Err(Error::hash_mismatch(
                    format!("chunk {expected}"),
                    expected.clone(),
                    actual,
                ));
            }
            trace!("chunk {expected} ok ({} bytes)", location.size);
        }

        for build in &self.builds {
            self.verify_build_blobs(build)?;
        }

        Ok(())
    }

    /// Re-hash the repository and manifest blobs of one build
    pub fn verify_build(&self, build_id: u64) -> Result<()> {
        let build = self.find_build(build_id)?;
        self.verify_build_blobs(build)
    }

    fn verify_build_blobs(&self, build: &BuildMeta) -> Result<()> {
        let blob = self.read_build_blob(build.repo_offset, build.repo_size)?;
        check_blob_hash(&build.repository_id, &blob, "repository")?;
        for manifest in &build.manifests {
            let blob = self.read_build_blob(manifest.offset, manifest.size)?;
            check_blob_hash(&manifest.depot_id, &blob, "manifest")?;
        }
        Ok(())
    }
}

fn check_blob_hash(expected: &[u8; 16], blob: &[u8], kind: &str) -> Result<()> {
    let actual = md5_hex(blob);
    let expected_hex = hex::encode(expected);
    if actual != expected_hex {
        return Err(Error::hash_mismatch(
            format!("{kind} {expected_hex}"),
            expected_hex.clone(),
            actual,
        ));
    }
    Ok(())
}

fn base_name(part0: &Path) -> Result<(PathBuf, String)> {
    let dir = part0
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let name = part0
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid_archive("archive path has no file name"))?;
    let base = name.strip_suffix(".rgog").unwrap_or(name).to_string();
    Ok((dir, base))
}

fn validate_bounds(header: &Header, file_len: u64) -> Result<()> {
    for (name, section) in [
        ("ProductMetadata", header.sections.product_metadata),
        ("BuildMetadata", header.sections.build_metadata),
        ("BuildFiles", header.sections.build_files),
        ("ChunkMetadata", header.sections.chunk_metadata),
        ("ChunkFiles", header.sections.chunk_files),
    ] {
        if !section.is_present() {
            continue;
        }
        if section.offset < format::HEADER_LEN
            || section.offset % format::SECTION_ALIGN != 0
            || section.end() > file_len
        {
            return Err(Error::invalid_archive(format!(
                "{name} section [{}, +{}) outside file of {file_len} bytes",
                section.offset, section.size
            )));
        }
    }
    Ok(())
}

fn read_products(file: &mut File, header: &Header) -> Result<Vec<u64>> {
    let section = header.sections.product_metadata;
    if !section.is_present() {
        return Ok(Vec::new());
    }
    let bytes = read_exact_at(file, section.offset, section.size)?;
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u32::<LE>()?;
    if u64::from(count) * 8 + 4 != section.size {
        return Err(Error::invalid_archive(format!(
            "ProductMetadata declares {count} products in {} bytes",
            section.size
        )));
    }
    let mut products = Vec::with_capacity(count as usize);
    for _ in 0..count {
        products.push(cursor.read_u64::<LE>()?);
    }
    Ok(products)
}

fn read_builds(file: &mut File, header: &Header) -> Result<Vec<BuildMeta>> {
    let section = header.sections.build_metadata;
    if !section.is_present() {
        return Ok(Vec::new());
    }
    let bytes = read_exact_at(file, section.offset, section.size)?;
    let mut cursor = Cursor::new(&bytes);
    let mut builds = Vec::with_capacity(usize::from(header.total_build_count));
    for _ in 0..header.total_build_count {
        builds.push(BuildMeta::read_from(&mut cursor)?);
    }
    if cursor.position() != bytes.len() as u64 {
        return Err(Error::invalid_archive(format!(
            "BuildMetadata has {} trailing bytes",
            bytes.len() as u64 - cursor.position()
        )));
    }
    Ok(builds)
}

fn index_chunks(
    file: &mut File,
    header: &Header,
    part: u32,
    entries: &mut Vec<([u8; 16], ChunkLocation)>,
) -> Result<()> {
    let section = header.sections.chunk_metadata;
    let expected = format::CHUNK_META_LEN * u64::from(header.local_chunk_count);
    if section.size != expected {
        return Err(Error::invalid_archive(format!(
            "part {part}: ChunkMetadata size {} does not match {} chunks",
            section.size, header.local_chunk_count
        )));
    }
    if !section.is_present() {
        return Ok(());
    }

    let data_start = header.sections.chunk_files.offset;
    let bytes = read_exact_at(file, section.offset, section.size)?;
    let mut cursor = Cursor::new(bytes);
    for _ in 0..header.local_chunk_count {
        let meta = ChunkMeta::read_from(&mut cursor)?;
        if meta.offset + meta.size > header.sections.chunk_files.size {
            return Err(Error::invalid_archive(format!(
                "chunk {} exceeds ChunkFiles bounds",
                hex::encode(meta.md5_compressed)
            )));
        }
        entries.push((
            meta.md5_compressed,
            ChunkLocation {
                part,
                offset: data_start + meta.offset,
                size: meta.size,
                product_id: meta.product_id,
            },
        ));
    }
    Ok(())
}

fn read_exact_at(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
