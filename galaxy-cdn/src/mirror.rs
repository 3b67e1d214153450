//! On-disk CDN mirror layout
//!
//! Archival mode reproduces the CDN's content-addressed tree locally:
//!
//! ```text
//! {root}/v2/meta/{h[:2]}/{h[2:4]}/{h}            zlib-compressed JSON
//! {root}/v2/store/{pid}/{h[:2]}/{h[2:4]}/{h}     zlib-compressed chunk
//! {root}/v2/patches/meta/{h[:2]}/{h[2:4]}/{h}    patch manifests
//! {root}/v2/patches/store/{h[:2]}/{h[2:4]}/{h}   patch delta chunks
//! {root}/v1/manifests/{pid}/{platform}/{repo}/   plain JSON
//! {root}/v1/depots/{pid}/{platform}/{repo}/main.bin
//! ```
//!
//! `h` is the lowercase 32-hex MD5 of the stored (compressed) body.

use std::path::{Path, PathBuf};
use tracing::trace;

use galaxy_client::utils::{galaxy_path, md5_hex};

use crate::Result;

/// Content-addressed mirror rooted at one output directory
#[derive(Debug, Clone)]
pub struct CdnMirror {
    root: PathBuf,
}

impl CdnMirror {
    /// Create a mirror over the given root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The mirror root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a build or depot manifest blob
    pub fn meta_path(&self, hash: &str) -> PathBuf {
        self.root.join("v2/meta").join(galaxy_path(hash))
    }

    /// Path of a store chunk blob
    pub fn store_path(&self, product_id: &str, hash: &str) -> PathBuf {
        self.root
            .join("v2/store")
            .join(product_id)
            .join(galaxy_path(hash))
    }

    /// Path of a patch manifest blob
    pub fn patch_meta_path(&self, hash: &str) -> PathBuf {
        self.root.join("v2/patches/meta").join(galaxy_path(hash))
    }

    /// Path of a patch delta chunk blob
    pub fn patch_store_path(&self, hash: &str) -> PathBuf {
        self.root.join("v2/patches/store").join(galaxy_path(hash))
    }

    /// Path of a V1 manifest JSON
    pub fn v1_manifest_path(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        name: &str,
    ) -> PathBuf {
        self.root
            .join("v1/manifests")
            .join(product_id)
            .join(platform)
            .join(repository_id)
            .join(format!("{name}.json"))
    }

    /// Path of a V1 depot blob
    pub fn v1_blob_path(&self, product_id: &str, platform: &str, repository_id: &str) -> PathBuf {
        self.root
            .join("v1/depots")
            .join(product_id)
            .join(platform)
            .join(repository_id)
            .join("main.bin")
    }

    /// Store a manifest body as served, keyed by its own MD5
    ///
    /// Returns the content hash and path. Writing the same body twice is a
    /// no-op.
    pub async fn write_meta(&self, body: &[u8]) -> Result<(String, PathBuf)> {
        let hash = md5_hex(body);
        let path = self.meta_path(&hash);
        write_if_absent(&path, body).await?;
        Ok((hash, path))
    }

    /// Store a patch manifest body as served, keyed by its own MD5
    pub async fn write_patch_meta(&self, body: &[u8]) -> Result<(String, PathBuf)> {
        let hash = md5_hex(body);
        let path = self.patch_meta_path(&hash);
        write_if_absent(&path, body).await?;
        Ok((hash, path))
    }

    /// Store a compressed chunk under its content address
    pub async fn write_chunk(
        &self,
        product_id: &str,
        hash: &str,
        body: &[u8],
    ) -> Result<PathBuf> {
        let path = self.store_path(product_id, hash);
        write_if_absent(&path, body).await?;
        Ok(path)
    }

    /// Store a patch delta chunk under its content address
    pub async fn write_patch_chunk(&self, hash: &str, body: &[u8]) -> Result<PathBuf> {
        let path = self.patch_store_path(hash);
        write_if_absent(&path, body).await?;
        Ok(path)
    }

    /// Store a V1 manifest JSON body
    pub async fn write_v1_manifest(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        name: &str,
        body: &[u8],
    ) -> Result<PathBuf> {
        let path = self.v1_manifest_path(product_id, platform, repository_id, name);
        write_if_absent(&path, body).await?;
        Ok(path)
    }
}

async fn write_if_absent(path: &Path, body: &[u8]) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        trace!("mirror hit, keeping {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_content_addressed_layout() {
        let mirror = CdnMirror::new("/tmp/out");
        let hash = "e80b5017098950fc58aad83c8c14978e";

        assert_eq!(
            mirror.meta_path(hash),
            PathBuf::from("/tmp/out/v2/meta/e8/0b/e80b5017098950fc58aad83c8c14978e")
        );
        assert_eq!(
            mirror.store_path("1207658930", hash),
            PathBuf::from("/tmp/out/v2/store/1207658930/e8/0b/e80b5017098950fc58aad83c8c14978e")
        );
        assert_eq!(
            mirror.patch_store_path(hash),
            PathBuf::from("/tmp/out/v2/patches/store/e8/0b/e80b5017098950fc58aad83c8c14978e")
        );
        assert_eq!(
            mirror.v1_blob_path("10", "windows", "2000000001"),
            PathBuf::from("/tmp/out/v1/depots/10/windows/2000000001/main.bin")
        );
    }
}
