//! `info` — build listing for a product, or a summary of an archive
//!
//! The positional argument is an archive when it names an existing
//! `.rgog` file, a product id otherwise.

use std::path::Path;

use clap::Args;
use galaxy_manifest::ManifestResolver;
use rgog_archive::Archive;

use super::api_client;

#[derive(Args)]
pub struct InfoArgs {
    /// Product id, or path of an RGOG archive
    pub target: String,

    /// Platform for product build listings
    #[arg(long, default_value = "windows")]
    pub platform: String,

    /// Print per-product and per-part statistics for archives
    #[arg(long)]
    pub stats: bool,
}

pub async fn handle(args: InfoArgs) -> anyhow::Result<()> {
    let path = Path::new(&args.target);
    if path.is_file() {
        return archive_info(path, args.stats);
    }
    product_info(&args.target, &args.platform).await
}

/// TSV build listing: `index  build_id  generation  date  version`
async fn product_info(product_id: &str, platform: &str) -> anyhow::Result<()> {
    let resolver = ManifestResolver::new(api_client()?);
    let builds = resolver.list_all_builds(product_id, platform).await?;

    if builds.is_empty() {
        anyhow::bail!(galaxy_manifest::Error::not_found(format!(
            "builds of {product_id}/{platform}"
        )));
    }

    for (index, build) in builds.iter().enumerate() {
        let date = build
            .date_published
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{index}\t{}\t{}\t{date}\t{}",
            build.build_id,
            build.generation,
            build.version_name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn archive_info(path: &Path, stats: bool) -> anyhow::Result<()> {
    let archive = Archive::open(path)?;
    let header = archive.header();
    let summary = archive.stats();

    println!("archive:  {}", path.display());
    println!("version:  {:#06x}", rgog_archive::VERSION);
    println!("parts:    {}", summary.parts);
    println!("builds:   {}", summary.builds);
    println!("chunks:   {}", summary.chunks);
    println!("data:     {} bytes", summary.chunk_bytes + summary.build_files_bytes);

    if stats {
        println!("products: {:?}", summary.products);
        println!("build files: {} bytes", summary.build_files_bytes);
        println!("chunk bytes: {} bytes", summary.chunk_bytes);
        println!("declared total chunks: {}", header.total_chunk_count);
    }
    Ok(())
}
