//! Per-task download primitives
//!
//! A task is one HTTP object: a content-addressed chunk or a byte range of
//! a depot blob. Tasks verify, decompress and write independently; file
//! correctness does not depend on completion order because every write
//! targets a disjoint interval.

use std::io::SeekFrom;
use std::path::Path;

use galaxy_client::{ApiClient, GALAXY_PATH_TOKEN, utils::md5_hex};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{trace, warn};

use crate::{Error, Result};

/// Fetch attempts per task when the body hash keeps mismatching
const HASH_ATTEMPTS: usize = 3;

/// Fetch attempts per range task on transient failures and short bodies
const RANGE_ATTEMPTS: usize = 5;

/// Substitute the content path into a secure-link template
pub(crate) fn resolve_url(template: &str, cdn_path: &str) -> String {
    template.replace(GALAXY_PATH_TOKEN, cdn_path)
}

/// Fetch a content-addressed object and verify its compressed MD5
///
/// Rotates across the CDN URL templates on every attempt; a mismatching
/// body is retried up to three times in total, a 404 is permanent.
pub(crate) async fn fetch_verified(
    api: &ApiClient,
    templates: &[String],
    cdn_path: &str,
    expected_md5: &str,
) -> Result<Vec<u8>> {
    if templates.is_empty() {
        return Err(Error::invalid_item(cdn_path, "no CDN urls available"));
    }
    let mut last: Option<Error> = None;

    for attempt in 0..HASH_ATTEMPTS {
        let url = resolve_url(&templates[attempt % templates.len()], cdn_path);
        match api.get_bytes(&url).await {
            Ok(bytes) => {
                let actual = md5_hex(&bytes);
                if actual == expected_md5 {
                    trace!("fetched {cdn_path} ({} bytes)", bytes.len());
                    return Ok(bytes);
                }
                warn!(
                    "hash mismatch for {cdn_path} (attempt {}): expected {expected_md5}, got {actual}",
                    attempt + 1
                );
                last = Some(Error::hash_mismatch(cdn_path, expected_md5, actual));
            }
            Err(galaxy_client::Error::NotFound { resource }) => {
                return Err(Error::not_found(resource));
            }
            Err(e) => {
                warn!("fetch of {cdn_path} failed on {url}: {e}");
                last = Some(e.into());
            }
        }
    }

    Err(last.unwrap_or_else(|| Error::not_found(cdn_path)))
}

/// Fetch one byte range of a depot blob
///
/// Range responses carry no per-task hash; a truncated body counts as a
/// transient failure against the five-attempt budget, rotating to the
/// next CDN URL, and the caller verifies the assembled file.
pub(crate) async fn fetch_range(
    api: &ApiClient,
    templates: &[String],
    cdn_path: &str,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    if templates.is_empty() {
        return Err(Error::invalid_item(cdn_path, "no CDN urls available"));
    }
    let mut last: Option<Error> = None;

    for attempt in 0..RANGE_ATTEMPTS.max(templates.len()) {
        let url = resolve_url(&templates[attempt % templates.len()], cdn_path);
        match api.get_range(&url, offset, len).await {
            Ok(bytes) if bytes.len() as u64 == len => return Ok(bytes),
            Ok(bytes) => {
                warn!(
                    "short range body for {cdn_path} [{offset}, +{len}): got {}",
                    bytes.len()
                );
                last = Some(Error::invalid_item(
                    cdn_path,
                    format!("range returned {} of {len} bytes", bytes.len()),
                ));
            }
            Err(galaxy_client::Error::NotFound { resource }) => {
                return Err(Error::not_found(resource));
            }
            Err(e) => {
                warn!("range fetch of {cdn_path} failed on {url}: {e}");
                last = Some(e.into());
            }
        }
    }

    Err(last.unwrap_or_else(|| Error::not_found(cdn_path)))
}

/// Pre-allocate a file with a single sparse write at the last byte
pub(crate) async fn preallocate(path: &Path, size: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    if size > 0 {
        file.seek(SeekFrom::Start(size - 1)).await?;
        file.write_all(&[0]).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Write bytes at an absolute offset, leaving the rest of the file alone
pub(crate) async fn write_at(path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Streaming MD5 of a file on disk
pub(crate) async fn file_md5(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = md5::Context::new();
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.consume(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize().0))
}

/// Whether an on-disk file already carries the expected content
pub(crate) async fn is_verified(path: &Path, expected_md5: &str) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(true) => matches!(file_md5(path).await, Ok(actual) if actual == expected_md5),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_resolution_replaces_only_the_path_token() {
        let template = "https://cdn.example.com/token=abc/{GALAXY_PATH}";
        assert_eq!(
            resolve_url(template, "e8/0b/e80b"),
            "https://cdn.example.com/token=abc/e8/0b/e80b"
        );
    }

    #[tokio::test]
    async fn preallocate_then_positional_writes_assemble_the_file() {
        let dir = std::env::temp_dir().join("galaxy-cdn-worker-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("assembled.bin");

        preallocate(&path, 10).await.unwrap();
        write_at(&path, 5, b"fghij").await.unwrap();
        write_at(&path, 0, b"abcde").await.unwrap();

        let content = tokio::fs::read(&path).await.unwrap();
        assert_eq!(content, b"abcdefghij");
        assert_eq!(
            file_md5(&path).await.unwrap(),
            "e80b5017098950fc58aad83c8c14978e"
        );
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn zero_size_preallocation_creates_an_empty_file() {
        let dir = std::env::temp_dir().join("galaxy-cdn-worker-empty");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("empty");

        preallocate(&path, 0).await.unwrap();
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
