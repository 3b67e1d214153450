//! `download` — mirror a build's CDN content into a local archival tree
//!
//! Resolves the selected build, stores every manifest compressed-as-served
//! under `v2/meta` (or `v1/manifests`), and fetches the content objects
//! into `v2/store` / `v1/depots`. With `--from-build` only the chunks an
//! incremental update needs are fetched, and xdelta3 delta chunks land
//! under `v2/patches`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde_json::Value;
use tracing::{debug, info, warn};

use galaxy_cdn::{CdnMirror, Downloader, ProgressCounter};
use galaxy_manifest::{
    BuildInfo, DepotItem, DepotSource, Manifest, ManifestResolver, Patch, diff, patches,
};

use super::api_client;

#[derive(Args)]
pub struct DownloadArgs {
    /// Product id to mirror
    pub product_id: String,

    /// Build id to download; newest when omitted
    #[arg(long)]
    pub build: Option<String>,

    /// Position in the newest-first build listing, instead of --build
    #[arg(long, conflicts_with = "build")]
    pub index: Option<usize>,

    /// Platform to download
    #[arg(long, default_value = "windows")]
    pub platform: String,

    /// Output directory for the mirrored tree
    #[arg(short, long, default_value = "downloads")]
    pub output: PathBuf,

    /// Download worker count
    #[arg(long, default_value_t = galaxy_cdn::DEFAULT_WORKERS)]
    pub workers: usize,

    /// Language filter for depots
    #[arg(long, default_value = "en-US")]
    pub language: String,

    /// DLC product ids to include; repeatable
    #[arg(long = "dlc")]
    pub dlcs: Vec<String>,

    /// Previously mirrored build id: fetch only what the update needs
    #[arg(long)]
    pub from_build: Option<String>,
}

pub async fn handle(args: DownloadArgs) -> anyhow::Result<()> {
    let api = api_client()?;
    let resolver = ManifestResolver::new(api.clone());

    let builds = resolver
        .list_all_builds(&args.product_id, &args.platform)
        .await?;
    let selected: &BuildInfo = match (&args.build, args.index) {
        (Some(build_id), _) => builds
            .iter()
            .find(|b| b.build_id == *build_id)
            .ok_or_else(|| {
                galaxy_manifest::Error::not_found(format!(
                    "build {build_id} of {}",
                    args.product_id
                ))
            })?,
        (None, Some(index)) => builds.get(index).ok_or_else(|| {
            galaxy_manifest::Error::not_found(format!(
                "build index {index} of {}",
                args.product_id
            ))
        })?,
        (None, None) => builds.first().ok_or_else(|| {
            galaxy_manifest::Error::not_found(format!("builds of {}", args.product_id))
        })?,
    };

    info!(
        "downloading build {} (generation {}) of {}",
        selected.build_id, selected.generation, args.product_id
    );

    let manifest = resolver.resolve_build(selected).await?;
    let mirror = CdnMirror::new(&args.output);
    mirror_build_metadata(&api, selected, &manifest, &mirror).await?;

    let counter = Arc::new(ProgressCounter::new());
    let progress: galaxy_cdn::ProgressCallback = {
        let counter = Arc::clone(&counter);
        Arc::new(move |delta: u64, _total: u64| {
            counter.add(delta);
        })
    };
    let downloader = Downloader::builder()
        .api(api.clone())
        .workers(args.workers)
        .verify()
        .progress(progress)
        .build()?;

    let items = collect_items(&resolver, &manifest, &args.language, &args.dlcs).await?;
    info!("{} items selected", items.len());

    let mut failures: Vec<(String, anyhow::Error)> = Vec::new();

    if let Some(from_build) = &args.from_build {
        let old_manifest = resolver
            .resolve_by_build_id(&args.product_id, from_build, &args.platform)
            .await?;
        let old_items =
            collect_items(&resolver, &old_manifest, &args.language, &args.dlcs).await?;
        let patch = patches::get_patch(&api, &manifest, &old_manifest, &args.language, &args.dlcs)
            .await?;

        if patch.is_some() {
            mirror_patch_metadata(&api, &manifest, &old_manifest, &args, &mirror).await?;
        }

        let changes = diff::compare(&items, Some(&old_items), patch.as_ref());
        info!(
            "update {} -> {}: {} new, {} changed, {} patched, {} deleted",
            old_manifest.build_id,
            manifest.build_id,
            changes.new.len(),
            changes.changed.len(),
            changes.patched.len(),
            changes.deleted.len()
        );

        // A changed container member is materialised from its container,
        // so the container chunks must be mirrored too.
        let member_changed = changes
            .new
            .iter()
            .chain(&changes.changed)
            .any(|i| matches!(i, DepotItem::V2File(f) if f.is_in_sfc()));
        if member_changed {
            for item in items.iter().filter(|i| matches!(i, DepotItem::V2Sfc(_))) {
                if let Err(e) = downloader.download_item_raw(item, &mirror).await {
                    failures.push(("<sfc>".to_string(), e.into()));
                }
            }
        }

        for item in changes.new.iter().chain(&changes.changed) {
            if let Err(e) = downloader.download_item_raw(item, &mirror).await {
                failures.push((item.path().to_string(), e.into()));
            }
        }
        if let Some(patch) = &patch {
            download_patch_chunks(&downloader, &manifest, patch, &mirror, &mut failures).await;
        }
    } else {
        for item in &items {
            if let Err(e) = downloader.download_item_raw(item, &mirror).await {
                failures.push((item.path().to_string(), e.into()));
            }
        }
        // Generation-1 builds mirror the depot blob itself.
        for depot in manifest.filter_depots(&args.language, &args.dlcs) {
            if let DepotSource::V1 { blob, .. } = &depot.source {
                let item = DepotItem::V1Blob(blob.clone());
                if let Err(e) = downloader.download_item_raw(&item, &mirror).await {
                    failures.push(("main.bin".to_string(), e.into()));
                }
            }
        }
    }

    info!(
        "{} bytes fetched into {}",
        counter.done(),
        args.output.display()
    );

    for (path, error) in &failures {
        eprintln!("{path}: {error:#}");
    }
    match failures
        .into_iter()
        .max_by_key(|(_, e)| crate::exit_code_for(e))
    {
        Some((_, worst)) => Err(worst),
        None => Ok(()),
    }
}

/// Fetch the raw manifest bodies and store them where pack expects them
async fn mirror_build_metadata(
    api: &galaxy_client::ApiClient,
    build: &BuildInfo,
    manifest: &Manifest,
    mirror: &CdnMirror,
) -> anyhow::Result<()> {
    if manifest.generation == 2 {
        let link = build
            .link
            .as_deref()
            .ok_or_else(|| galaxy_manifest::Error::not_found("repository link"))?;
        let raw = api.manifest_at_raw(link).await?;
        let (hash, _) = mirror.write_meta(&raw).await?;
        debug!("repository stored as {hash}");

        for depot in &manifest.depots {
            if let DepotSource::V2 { manifest: hash } = &depot.source {
                let raw = api.v2_manifest_raw(hash).await?;
                mirror.write_meta(&raw).await?;
            }
        }
    } else {
        let repository_id = manifest
            .repository_id
            .as_deref()
            .ok_or_else(|| galaxy_manifest::Error::not_found("repository id"))?;
        let url = api.v1_manifest_url(
            &manifest.base_product_id,
            &manifest.platform,
            repository_id,
            "repository",
        );
        let raw = api.get_bytes(&url).await?;
        mirror
            .write_v1_manifest(
                &manifest.base_product_id,
                &manifest.platform,
                repository_id,
                "repository",
                &raw,
            )
            .await?;
    }
    Ok(())
}

/// Store the patch root and per-depot patch manifests compressed-as-served
async fn mirror_patch_metadata(
    api: &galaxy_client::ApiClient,
    new_manifest: &Manifest,
    old_manifest: &Manifest,
    args: &DownloadArgs,
    mirror: &CdnMirror,
) -> anyhow::Result<()> {
    let info = api
        .patch_info(
            &new_manifest.base_product_id,
            &old_manifest.build_id,
            &new_manifest.build_id,
        )
        .await?;
    let Some(link) = info.get("link").and_then(Value::as_str) else {
        return Ok(());
    };

    let raw_root = api.manifest_at_raw(link).await?;
    mirror.write_patch_meta(&raw_root).await?;

    let root = api.manifest_at(link).await?;
    let Ok(root) = serde_json::from_value::<galaxy_manifest::v2::PatchRoot>(root) else {
        return Ok(());
    };
    for depot in &root.depots {
        let product_matches = depot.product_id == new_manifest.base_product_id
            || args.dlcs.iter().any(|d| *d == depot.product_id);
        let language_matches = depot.languages.is_empty()
            || depot
                .languages
                .iter()
                .any(|l| l == "*" || l.eq_ignore_ascii_case(&args.language));
        if !product_matches || !language_matches {
            continue;
        }
        match api.v2_patch_manifest_raw(&depot.manifest).await {
            Ok(raw) => {
                mirror.write_patch_meta(&raw).await?;
            }
            Err(e) => warn!("patch manifest {} not mirrored: {e}", depot.manifest),
        }
    }
    Ok(())
}

async fn download_patch_chunks(
    downloader: &Downloader,
    manifest: &Manifest,
    patch: &Patch,
    mirror: &CdnMirror,
    failures: &mut Vec<(String, anyhow::Error)>,
) {
    for file_patch in &patch.files {
        for chunk in &file_patch.chunks {
            if let Err(e) = downloader
                .download_patch_chunk(
                    &manifest.base_product_id,
                    &patch.client_id,
                    &patch.client_secret,
                    &chunk.md5_compressed,
                    mirror,
                )
                .await
            {
                failures.push((file_patch.target_path.clone(), e.into()));
                break;
            }
        }
    }
}

/// Items of every depot matching the language and DLC selection
async fn collect_items(
    resolver: &ManifestResolver,
    manifest: &Manifest,
    language: &str,
    dlcs: &[String],
) -> anyhow::Result<Vec<DepotItem>> {
    let mut items = Vec::new();
    for depot in manifest.filter_depots(language, dlcs) {
        items.extend(resolver.depot_items(depot).await?);
    }
    Ok(items)
}
