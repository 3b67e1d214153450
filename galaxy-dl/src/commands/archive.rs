//! `pack`, `unpack`, `list`, `extract`, `verify` — RGOG container surface

use std::path::PathBuf;

use clap::Args;
use rgog_archive::{Archive, ExtractOptions, PackOptions, UnpackOptions};

#[derive(Args)]
pub struct PackArgs {
    /// Mirrored CDN tree to pack (the directory holding `v2/`)
    pub dir: PathBuf,

    /// Output archive (part 0); `.rgog` is appended when missing
    #[arg(short, long)]
    pub output: PathBuf,

    /// Bound on the data bytes of one part
    #[arg(long, default_value_t = rgog_archive::DEFAULT_MAX_PART_SIZE)]
    pub max_part_size: u64,
}

pub fn handle_pack(args: &PackArgs) -> anyhow::Result<()> {
    let summary = rgog_archive::pack(
        &args.dir,
        &args.output,
        &PackOptions {
            max_part_size: args.max_part_size,
        },
    )?;

    println!(
        "packed {} builds, {} chunks, {} data bytes into {} part(s)",
        summary.builds,
        summary.chunks,
        summary.data_bytes,
        summary.parts.len()
    );
    for part in &summary.parts {
        println!("  {}", part.display());
    }
    Ok(())
}

#[derive(Args)]
pub struct UnpackArgs {
    /// Archive to unpack (part 0)
    pub archive: PathBuf,

    /// Output directory for the restored v2 tree
    #[arg(short, long)]
    pub output: PathBuf,

    /// Also write pretty-printed JSON copies under `{out}/debug/`
    #[arg(long)]
    pub debug: bool,

    /// Write chunks only, skipping the meta tree
    #[arg(long)]
    pub chunks_only: bool,
}

pub fn handle_unpack(args: &UnpackArgs) -> anyhow::Result<()> {
    let archive = Archive::open(&args.archive)?;
    rgog_archive::unpack(
        &archive,
        &args.output,
        &UnpackOptions {
            debug: args.debug,
            chunks_only: args.chunks_only,
        },
    )?;
    println!("unpacked to {}", args.output.display());
    Ok(())
}

#[derive(Args)]
pub struct ListArgs {
    /// Archive to list (part 0)
    pub archive: PathBuf,

    /// Also print each build's depot manifests
    #[arg(long)]
    pub detailed: bool,

    /// Restrict to one build id
    #[arg(long)]
    pub build: Option<u64>,
}

pub fn handle_list(args: &ListArgs) -> anyhow::Result<()> {
    let archive = Archive::open(&args.archive)?;

    if let Some(build_id) = args.build {
        // Fails with the not-found exit code when the id is absent.
        archive.find_build(build_id)?;
    }

    for (summary, build) in archive.list().iter().zip(archive.builds()) {
        if args.build.is_some_and(|id| id != summary.build_id) {
            continue;
        }
        println!(
            "{}\t{}\t{}\t{} manifest(s)\t[{}]",
            summary.build_id,
            summary.os,
            summary.repository,
            summary.manifest_count,
            summary.languages.join(", ")
        );
        if args.detailed {
            for manifest in &build.manifests {
                println!(
                    "    {}\t{} bytes",
                    hex::encode(manifest.depot_id),
                    manifest.size
                );
            }
        }
    }
    Ok(())
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Archive to extract from (part 0)
    pub archive: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Restrict to one build id
    #[arg(long)]
    pub build: Option<u64>,

    /// Reassemble logical game files instead of the CDN tree
    #[arg(long)]
    pub reassemble: bool,

    /// CDN-tree mode: write only the referenced chunks
    #[arg(long, conflicts_with = "reassemble")]
    pub chunks_only: bool,
}

pub fn handle_extract(args: &ExtractArgs) -> anyhow::Result<()> {
    let archive = Archive::open(&args.archive)?;
    rgog_archive::extract(
        &archive,
        &args.output,
        &ExtractOptions {
            build_id: args.build,
            reassemble: args.reassemble,
            chunks_only: args.chunks_only,
        },
    )?;
    println!("extracted to {}", args.output.display());
    Ok(())
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Archive to verify (part 0)
    pub archive: PathBuf,

    /// Structural checks only; skip re-hashing content
    #[arg(long)]
    pub quick: bool,

    /// Verify the metadata blobs of one build only
    #[arg(long)]
    pub build: Option<u64>,
}

pub fn handle_verify(args: &VerifyArgs) -> anyhow::Result<()> {
    let archive = Archive::open(&args.archive)?;

    if let Some(build_id) = args.build {
        archive.verify_build(build_id)?;
        println!("build {build_id}: ok");
        return Ok(());
    }

    archive.verify(args.quick)?;
    println!(
        "{}: ok ({})",
        args.archive.display(),
        if args.quick { "quick" } else { "full" }
    );
    Ok(())
}
