//! Parallel verified downloader
//!
//! Materialises [`DepotItem`]s from the CDN: chunked V2 files assembled by
//! positional writes, Small Files Containers sliced in memory, V1 depot
//! blobs fetched as byte ranges. A fixed worker pool is owned by the
//! downloader for its lifetime; workers cooperate on the chunks of a single
//! item rather than racing across items.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use galaxy_client::utils::{galaxy_path, inflate, md5_hex};
use galaxy_client::{ApiClient, SecureLinkProvider};
use galaxy_manifest::{DepotItem, SfcRef, V1BlobItem, V1FileItem, V2FileItem, V2SfcItem};

use crate::mirror::CdnMirror;
use crate::progress::ProgressCallback;
use crate::worker::{
    fetch_range, fetch_verified, file_md5, is_verified, preallocate, write_at,
};
use crate::{Error, Result};

/// Slice size for generation-1 blob range tasks
pub const V1_TASK_SIZE: u64 = 10 * 1024 * 1024;

/// Default worker count
pub const DEFAULT_WORKERS: usize = 4;

/// Upper bound on the worker count
pub const MAX_WORKERS: usize = 32;

/// A decompressed Small Files Container held in memory
///
/// Member files are materialised by slicing this buffer; typical
/// containers are at most a few megabytes.
#[derive(Debug, Clone)]
pub struct SfcData {
    bytes: Vec<u8>,
}

impl SfcData {
    /// The decompressed container body
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Slice one member file out of the container
    pub fn slice(&self, sfc_ref: SfcRef) -> Option<&[u8]> {
        let start = usize::try_from(sfc_ref.offset).ok()?;
        let end = start.checked_add(usize::try_from(sfc_ref.size).ok()?)?;
        self.bytes.get(start..end)
    }
}

/// Builder for [`Downloader`]
#[derive(Default)]
pub struct DownloaderBuilder {
    api: Option<ApiClient>,
    secure_links: Option<Arc<SecureLinkProvider>>,
    workers: Option<usize>,
    verify: bool,
    progress: Option<ProgressCallback>,
    cancellation: Option<CancellationToken>,
    fail_fast: bool,
}

impl DownloaderBuilder {
    /// Required: the API client downloads go through
    pub fn api(mut self, api: ApiClient) -> Self {
        self.api = Some(api);
        self
    }

    /// Optional: a shared secure-link provider; one is created from the
    /// API client when not supplied
    pub fn secure_links(mut self, provider: Arc<SecureLinkProvider>) -> Self {
        self.secure_links = Some(provider);
        self
    }

    /// Worker pool size, clamped to `1..=32`
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.clamp(1, MAX_WORKERS));
        self
    }

    /// Verify file-level hashes after assembly and skip items that are
    /// already present and valid on disk
    pub fn verify(mut self) -> Self {
        self.verify = true;
        self
    }

    /// Progress callback receiving `(bytes_done_delta, total_bytes)`
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Use an externally owned cancellation token
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Abort `download_items` on the first failed item
    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    /// Build the downloader
    pub fn build(self) -> Result<Downloader> {
        let api = self
            .api
            .ok_or_else(|| Error::invalid_item("downloader", "builder without api client"))?;
        let secure_links = self
            .secure_links
            .unwrap_or_else(|| Arc::new(SecureLinkProvider::new(api.clone())));

        Ok(Downloader {
            api,
            secure_links,
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            verify: self.verify,
            progress: self.progress,
            cancellation: self.cancellation.unwrap_or_default(),
            fail_fast: self.fail_fast,
        })
    }
}

/// Downloads depot items with a fixed-size worker pool
pub struct Downloader {
    api: ApiClient,
    secure_links: Arc<SecureLinkProvider>,
    workers: usize,
    verify: bool,
    progress: Option<ProgressCallback>,
    cancellation: CancellationToken,
    fail_fast: bool,
}

impl Downloader {
    /// Create a builder
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::default()
    }

    /// Token that aborts queuing and signals in-flight requests
    ///
    /// Partial files are left as-is after cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn report(&self, delta: u64, total: u64) {
        if let Some(callback) = &self.progress {
            callback(delta, total);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Download one item into `out_dir` at its logical path
    ///
    /// Members of a Small Files Container are sliced from `sfc` when
    /// provided; without it the member's advisory chunks are fetched
    /// directly, which the CDN is permitted to 404.
    pub async fn download_item(
        &self,
        item: &DepotItem,
        out_dir: &Path,
        sfc: Option<&SfcData>,
    ) -> Result<PathBuf> {
        self.check_cancelled()?;
        match item {
            DepotItem::V2File(file) => self.download_v2_file(file, out_dir, sfc).await,
            DepotItem::V1Blob(blob) => {
                let target = out_dir.join(galaxy_manifest::types::V1_BLOB_PATH);
                self.download_v1_blob(blob, &target).await?;
                Ok(target)
            }
            DepotItem::V1File(file) => self.download_v1_file(file, out_dir).await,
            DepotItem::V2Sfc(_) => Err(Error::invalid_item(
                "<sfc>",
                "containers are materialised with download_sfc",
            )),
        }
    }

    /// Download several items, returning per-item results keyed by path
    ///
    /// Small Files Containers are downloaded once and their members sliced
    /// from memory. A failed item does not abort its siblings unless the
    /// downloader was built `fail_fast`.
    pub async fn download_items(
        &self,
        items: &[DepotItem],
        out_dir: &Path,
    ) -> BTreeMap<String, Result<PathBuf>> {
        let mut results = BTreeMap::new();
        let mut containers: HashMap<String, SfcData> = HashMap::new();

        for item in items {
            if self.cancellation.is_cancelled() {
                break;
            }

            if let DepotItem::V2Sfc(sfc) = item {
                match self.download_sfc(sfc).await {
                    Ok(data) => {
                        containers.insert(sfc.product_id.clone(), data);
                    }
                    Err(e) => {
                        warn!("small files container for {} failed: {e}", sfc.product_id);
                        results.insert(format!("<sfc:{}>", sfc.product_id), Err(e));
                        if self.fail_fast {
                            break;
                        }
                    }
                }
                continue;
            }

            let sfc = match item {
                DepotItem::V2File(f) if f.is_in_sfc() => containers.get(&f.product_id),
                _ => None,
            };

            let result = self.download_item(item, out_dir, sfc).await;
            let failed = result.is_err();
            results.insert(item.path().to_string(), result);
            if failed && self.fail_fast {
                break;
            }
        }

        results
    }

    /// Download and decompress a Small Files Container into memory
    pub async fn download_sfc(&self, sfc: &V2SfcItem) -> Result<SfcData> {
        self.check_cancelled()?;
        let templates = self.secure_links.store_urls(&sfc.product_id, 2).await?;
        let total: u64 = sfc.chunks.iter().map(|c| c.size_uncompressed).sum();
        let mut bytes = Vec::with_capacity(usize::try_from(total).unwrap_or(0));

        for chunk in &sfc.chunks {
            self.check_cancelled()?;
            let compressed = self
                .run_cancellable(fetch_verified(
                    &self.api,
                    &templates,
                    &galaxy_path(&chunk.md5_compressed),
                    &chunk.md5_compressed,
                ))
                .await?;
            let plain = inflate(&compressed)?;
            if self.verify && md5_hex(&plain) != chunk.md5_uncompressed {
                return Err(Error::hash_mismatch(
                    &chunk.md5_compressed,
                    &chunk.md5_uncompressed,
                    md5_hex(&plain),
                ));
            }
            self.report(plain.len() as u64, total);
            bytes.extend_from_slice(&plain);
        }

        debug!(
            "small files container for {} decompressed to {} bytes",
            sfc.product_id,
            bytes.len()
        );
        Ok(SfcData { bytes })
    }

    async fn download_v2_file(
        &self,
        file: &V2FileItem,
        out_dir: &Path,
        sfc: Option<&SfcData>,
    ) -> Result<PathBuf> {
        let target = out_dir.join(&file.path);
        let total = file.total_size();

        if total == 0 {
            preallocate(&target, 0).await?;
            return Ok(target);
        }

        if self.verify {
            if let Some(expected) = &file.md5 {
                if is_verified(&target, expected).await {
                    trace!("{} already verified, skipping", file.path);
                    return Ok(target);
                }
            }
        }

        if let Some(sfc_ref) = file.sfc_ref {
            if let Some(data) = sfc {
                let body = data.slice(sfc_ref).ok_or_else(|| {
                    Error::invalid_item(&file.path, "sfc slice out of container bounds")
                })?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, body).await?;
                self.verify_file(&target, file.md5.as_deref(), &file.path)
                    .await?;
                self.report(body.len() as u64, total);
                return Ok(target);
            }
            trace!(
                "{} is in a container but none was supplied; trying direct chunks",
                file.path
            );
        }

        self.download_chunked(file, &target).await?;
        Ok(target)
    }

    async fn download_chunked(&self, file: &V2FileItem, target: &Path) -> Result<()> {
        let templates = Arc::new(self.secure_links.store_urls(&file.product_id, 2).await?);
        let total = file.chunks.iter().map(|c| c.size_uncompressed).sum::<u64>();
        preallocate(target, total).await?;

        let tasks = file.chunks.iter().map(|chunk| {
            let templates = Arc::clone(&templates);
            let target = target.to_path_buf();
            async move {
                self.run_cancellable(async {
                    let compressed = fetch_verified(
                        &self.api,
                        &templates,
                        &galaxy_path(&chunk.md5_compressed),
                        &chunk.md5_compressed,
                    )
                    .await?;
                    let plain = inflate(&compressed)?;
                    if self.verify && md5_hex(&plain) != chunk.md5_uncompressed {
                        return Err(Error::hash_mismatch(
                            &chunk.md5_compressed,
                            &chunk.md5_uncompressed,
                            md5_hex(&plain),
                        ));
                    }
                    write_at(&target, chunk.offset_uncompressed, &plain).await?;
                    self.report(plain.len() as u64, total);
                    Ok(())
                })
                .await
            }
        });

        let mut buffered = stream::iter(tasks).buffer_unordered(self.workers);
        while let Some(result) = buffered.next().await {
            result?;
        }
        drop(buffered);

        self.verify_file(target, file.md5.as_deref(), &file.path)
            .await
    }

    async fn download_v1_blob(&self, blob: &V1BlobItem, target: &Path) -> Result<()> {
        if self.verify && is_verified(target, &blob.blob_md5).await {
            trace!("{} already verified, skipping", target.display());
            return Ok(());
        }

        let templates = Arc::new(self.secure_links.store_urls(&blob.product_id, 1).await?);
        let cdn_path = blob.cdn_path();
        let total = blob.total_size;
        preallocate(target, total).await?;

        let task_count = total.div_ceil(V1_TASK_SIZE);
        let tasks = (0..task_count).map(|i| {
            let templates = Arc::clone(&templates);
            let cdn_path = cdn_path.clone();
            let target = target.to_path_buf();
            let offset = i * V1_TASK_SIZE;
            let len = V1_TASK_SIZE.min(total - offset);
            async move {
                self.run_cancellable(async {
                    let bytes =
                        fetch_range(&self.api, &templates, &cdn_path, offset, len).await?;
                    write_at(&target, offset, &bytes).await?;
                    self.report(len, total);
                    Ok(())
                })
                .await
            }
        });

        let mut buffered = stream::iter(tasks).buffer_unordered(self.workers);
        while let Some(result) = buffered.next().await {
            result?;
        }
        drop(buffered);

        self.verify_file(target, Some(&blob.blob_md5), &cdn_path)
            .await?;
        info!("{} assembled ({total} bytes)", target.display());
        Ok(())
    }

    async fn download_v1_file(&self, file: &V1FileItem, out_dir: &Path) -> Result<PathBuf> {
        let target = out_dir.join(&file.path);

        if file.size == 0 {
            preallocate(&target, 0).await?;
            return Ok(target);
        }
        if self.verify && is_verified(&target, &file.md5).await {
            trace!("{} already verified, skipping", file.path);
            return Ok(target);
        }

        let templates = self.secure_links.store_urls(&file.blob.product_id, 1).await?;
        let bytes = self
            .run_cancellable(fetch_range(
                &self.api,
                &templates,
                &file.blob.cdn_path(),
                file.offset,
                file.size,
            ))
            .await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        self.verify_file(&target, Some(&file.md5), &file.path).await?;
        self.report(file.size, file.size);
        Ok(target)
    }

    /// Save the compressed bytes of one chunk into the mirror as-is
    ///
    /// Short-circuits when the content address is already present and
    /// valid on disk.
    pub async fn download_raw_chunk(
        &self,
        product_id: &str,
        md5_compressed: &str,
        mirror: &CdnMirror,
    ) -> Result<PathBuf> {
        self.check_cancelled()?;
        let path = mirror.store_path(product_id, md5_compressed);
        if is_verified(&path, md5_compressed).await {
            trace!("chunk {md5_compressed} already mirrored");
            return Ok(path);
        }

        let templates = self.secure_links.store_urls(product_id, 2).await?;
        let bytes = self
            .run_cancellable(fetch_verified(
                &self.api,
                &templates,
                &galaxy_path(md5_compressed),
                md5_compressed,
            ))
            .await?;
        self.report(bytes.len() as u64, 0);
        mirror.write_chunk(product_id, md5_compressed, &bytes).await
    }

    /// Save the compressed bytes of one patch delta chunk into the mirror
    ///
    /// Patch chunks live under a distinct credentialed CDN root.
    pub async fn download_patch_chunk(
        &self,
        product_id: &str,
        client_id: &str,
        client_secret: &str,
        md5_compressed: &str,
        mirror: &CdnMirror,
    ) -> Result<PathBuf> {
        self.check_cancelled()?;
        let path = mirror.patch_store_path(md5_compressed);
        if is_verified(&path, md5_compressed).await {
            trace!("patch chunk {md5_compressed} already mirrored");
            return Ok(path);
        }

        let templates = self
            .secure_links
            .patch_store_urls(product_id, client_id, client_secret)
            .await?;
        let bytes = self
            .run_cancellable(fetch_verified(
                &self.api,
                &templates,
                &galaxy_path(md5_compressed),
                md5_compressed,
            ))
            .await?;
        self.report(bytes.len() as u64, 0);
        mirror.write_patch_chunk(md5_compressed, &bytes).await
    }

    /// Mirror an item's CDN objects compressed-as-served
    ///
    /// Returns the stored paths. Containers and ordinary files must fetch
    /// every chunk; the advisory chunks of container members tolerate 404
    /// because the container is authoritative for them.
    pub async fn download_item_raw(
        &self,
        item: &DepotItem,
        mirror: &CdnMirror,
    ) -> Result<Vec<PathBuf>> {
        self.check_cancelled()?;
        match item {
            DepotItem::V2Sfc(sfc) => {
                let mut paths = Vec::with_capacity(sfc.chunks.len());
                for chunk in &sfc.chunks {
                    paths.push(
                        self.download_raw_chunk(&sfc.product_id, &chunk.md5_compressed, mirror)
                            .await?,
                    );
                }
                Ok(paths)
            }
            DepotItem::V2File(file) => {
                let mut paths = Vec::with_capacity(file.chunks.len());
                for chunk in &file.chunks {
                    match self
                        .download_raw_chunk(&file.product_id, &chunk.md5_compressed, mirror)
                        .await
                    {
                        Ok(path) => paths.push(path),
                        Err(e) if file.is_in_sfc() && e.is_not_found() => {
                            trace!(
                                "advisory chunk {} of {} absent from CDN",
                                chunk.md5_compressed, file.path
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(paths)
            }
            DepotItem::V1Blob(blob) => {
                let target =
                    mirror.v1_blob_path(&blob.product_id, &blob.platform, &blob.repository_id);
                self.download_v1_blob(blob, &target).await?;
                Ok(vec![target])
            }
            // V1 files are byte ranges of the blob; the blob is the
            // archival object.
            DepotItem::V1File(_) => Ok(Vec::new()),
        }
    }

    async fn verify_file(
        &self,
        target: &Path,
        expected: Option<&str>,
        label: &str,
    ) -> Result<()> {
        if !self.verify {
            return Ok(());
        }
        let Some(expected) = expected else {
            return Ok(());
        };
        let actual = file_md5(target).await?;
        if actual != expected {
            return Err(Error::hash_mismatch(label, expected, actual));
        }
        trace!("{label} verified");
        Ok(())
    }

    async fn run_cancellable<T>(
        &self,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            () = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = work => result,
        }
    }
}
