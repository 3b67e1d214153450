//! End-to-end downloader scenarios against a stub CDN

use std::io::Write;
use std::sync::Arc;

use flate2::{Compression, write::ZlibEncoder};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use galaxy_cdn::{CdnMirror, Downloader};
use galaxy_client::utils::md5_hex;
use galaxy_client::{ApiClient, Config, StaticTokenProvider};
use galaxy_manifest::{Chunk, DepotItem, SfcRef, V1BlobItem, V1FileItem, V2FileItem, V2SfcItem};

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

async fn mount_secure_link(server: &MockServer, product_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/products/{product_id}/secure_link")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "urls": [{
                "url_format": "{base}/cdn/{GALAXY_PATH}",
                "parameters": {"base": server.uri(), "expires_at": 4_102_444_800_i64},
                "priority": 0,
            }]
        })))
        .mount(server)
        .await;
}

async fn downloader_for(server: &MockServer) -> Downloader {
    let api = ApiClient::new(Config::for_root(server.uri()))
        .unwrap()
        .with_token_provider(Arc::new(StaticTokenProvider::new("t")));
    Downloader::builder()
        .api(api)
        .workers(4)
        .verify()
        .build()
        .unwrap()
}

fn single_chunk_file(path: &str, plain: &[u8], compressed: &[u8]) -> V2FileItem {
    V2FileItem {
        path: path.to_string(),
        product_id: "10".to_string(),
        md5: Some(md5_hex(plain)),
        chunks: vec![Chunk {
            md5_compressed: md5_hex(compressed),
            size_compressed: compressed.len() as u64,
            md5_uncompressed: md5_hex(plain),
            size_uncompressed: plain.len() as u64,
            offset_compressed: 0,
            offset_uncompressed: 0,
        }],
        sfc_ref: None,
    }
}

async fn mount_chunk(server: &MockServer, compressed: &[u8]) {
    let hash = md5_hex(compressed);
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/{}/{}/{hash}",
            &hash[..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn v2_single_chunk_file_assembles_and_verifies() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let plain = b"abcdefghij";
    let compressed = zlib(plain);
    mount_chunk(&server, &compressed).await;

    let file = single_chunk_file("game.exe", plain, &compressed);
    assert_eq!(file.md5.as_deref(), Some("e80b5017098950fc58aad83c8c14978e"));

    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;
    let target = downloader
        .download_item(&DepotItem::V2File(file), out.path(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), plain);
    assert_eq!(target, out.path().join("game.exe"));
}

#[tokio::test]
async fn v1_blob_downloads_with_a_single_range_request() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let blob_bytes: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/cdn/10/windows/2000000001/main.bin"))
        .and(header("Range", "bytes=0-1048575"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(blob_bytes.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let blob = V1BlobItem {
        product_id: "10".to_string(),
        platform: "windows".to_string(),
        repository_id: "2000000001".to_string(),
        blob_md5: md5_hex(&blob_bytes),
        total_size: blob_bytes.len() as u64,
    };

    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;
    let target = downloader
        .download_item(&DepotItem::V1Blob(blob), out.path(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), blob_bytes);
}

#[tokio::test]
async fn v1_file_extracts_one_byte_range_of_the_blob() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let blob_bytes: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let slice = &blob_bytes[100..150];
    Mock::given(method("GET"))
        .and(path("/cdn/10/windows/2000000001/main.bin"))
        .and(header("Range", "bytes=100-149"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(slice.to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let file = V1FileItem {
        path: "bin/config.dat".to_string(),
        offset: 100,
        size: 50,
        md5: md5_hex(slice),
        blob: V1BlobItem {
            product_id: "10".to_string(),
            platform: "windows".to_string(),
            repository_id: "2000000001".to_string(),
            blob_md5: md5_hex(&blob_bytes),
            total_size: blob_bytes.len() as u64,
        },
    };

    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;
    let target = downloader
        .download_item(&DepotItem::V1File(file), out.path(), None)
        .await
        .unwrap();

    assert_eq!(target, out.path().join("bin/config.dat"));
    assert_eq!(std::fs::read(&target).unwrap(), slice);
}

#[tokio::test]
async fn sfc_members_are_sliced_without_fetching_their_chunks() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let container: Vec<u8> = [vec![b'A'; 178], vec![b'B'; 241]].concat();
    let compressed = zlib(&container);
    let hash = md5_hex(&compressed);
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/{}/{}/{hash}",
            &hash[..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let sfc = DepotItem::V2Sfc(V2SfcItem {
        product_id: "10".to_string(),
        chunks: vec![Chunk {
            md5_compressed: hash,
            size_compressed: compressed.len() as u64,
            md5_uncompressed: md5_hex(&container),
            size_uncompressed: container.len() as u64,
            offset_compressed: 0,
            offset_uncompressed: 0,
        }],
    });
    let member = |name: &str, offset: u64, size: u64, body: &[u8]| {
        DepotItem::V2File(V2FileItem {
            path: name.to_string(),
            product_id: "10".to_string(),
            md5: Some(md5_hex(body)),
            // Advisory chunks: deliberately absent from the stub CDN.
            chunks: vec![Chunk {
                md5_compressed: "0".repeat(32),
                size_compressed: 1,
                md5_uncompressed: md5_hex(body),
                size_uncompressed: size,
                offset_compressed: 0,
                offset_uncompressed: 0,
            }],
            sfc_ref: Some(SfcRef { offset, size }),
        })
    };
    let items = vec![
        sfc,
        member("a.txt", 0, 178, &container[..178]),
        member("b.txt", 178, 241, &container[178..]),
    ];

    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;
    let results = downloader.download_items(&items, out.path()).await;

    assert_eq!(results.len(), 2);
    assert!(results.values().all(|r| r.is_ok()));
    assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap(), vec![b'A'; 178]);
    assert_eq!(std::fs::read(out.path().join("b.txt")).unwrap(), vec![b'B'; 241]);
}

#[tokio::test]
async fn persistent_hash_mismatch_fails_after_three_attempts() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let good_plain = b"good contents";
    let good_compressed = zlib(good_plain);
    mount_chunk(&server, &good_compressed).await;

    // A chunk whose body never matches its content address.
    let bad_plain = b"bad contents";
    let bad_compressed = zlib(bad_plain);
    let claimed_hash = "f".repeat(32);
    Mock::given(method("GET"))
        .and(path(format!("/cdn/ff/ff/{claimed_hash}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bad_compressed.clone()))
        .expect(3)
        .mount(&server)
        .await;

    let good = single_chunk_file("good.bin", good_plain, &good_compressed);
    let bad = V2FileItem {
        path: "bad.bin".to_string(),
        product_id: "10".to_string(),
        md5: Some(md5_hex(bad_plain)),
        chunks: vec![Chunk {
            md5_compressed: claimed_hash,
            size_compressed: bad_compressed.len() as u64,
            md5_uncompressed: md5_hex(bad_plain),
            size_uncompressed: bad_plain.len() as u64,
            offset_compressed: 0,
            offset_uncompressed: 0,
        }],
        sfc_ref: None,
    };

    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;
    let results = downloader
        .download_items(
            &[DepotItem::V2File(bad), DepotItem::V2File(good)],
            out.path(),
        )
        .await;

    assert!(matches!(
        results["bad.bin"],
        Err(galaxy_cdn::Error::HashMismatch { .. })
    ));
    assert!(results["good.bin"].is_ok());
}

#[tokio::test]
async fn zero_size_item_creates_an_empty_file_without_requests() {
    let server = MockServer::start().await;
    // No mocks at all: any HTTP request would fail the test via Err.

    let file = V2FileItem {
        path: "empty.dat".to_string(),
        product_id: "10".to_string(),
        md5: None,
        chunks: vec![],
        sfc_ref: None,
    };

    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;
    let target = downloader
        .download_item(&DepotItem::V2File(file), out.path(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::metadata(&target).unwrap().len(), 0);
}

#[tokio::test]
async fn verified_files_are_not_downloaded_twice() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let plain = b"abcdefghij";
    let compressed = zlib(plain);
    let hash = md5_hex(&compressed);
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/{}/{}/{hash}",
            &hash[..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let item = DepotItem::V2File(single_chunk_file("game.exe", plain, &compressed));
    let out = TempDir::new().unwrap();
    let downloader = downloader_for(&server).await;

    let first = downloader
        .download_item(&item, out.path(), None)
        .await
        .unwrap();
    let second = downloader
        .download_item(&item, out.path(), None)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::read(&second).unwrap(), plain);
}

#[tokio::test]
async fn raw_mode_mirrors_compressed_chunks_by_content_address() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "10").await;

    let plain = b"chunk body";
    let compressed = zlib(plain);
    let hash = md5_hex(&compressed);
    mount_chunk(&server, &compressed).await;

    let file = single_chunk_file("game.exe", plain, &compressed);
    let out = TempDir::new().unwrap();
    let mirror = CdnMirror::new(out.path());
    let downloader = downloader_for(&server).await;

    let paths = downloader
        .download_item_raw(&DepotItem::V2File(file), &mirror)
        .await
        .unwrap();

    assert_eq!(paths.len(), 1);
    let expected = out
        .path()
        .join("v2/store/10")
        .join(&hash[..2])
        .join(&hash[2..4])
        .join(&hash);
    assert_eq!(paths[0], expected);
    // Stored compressed as-is so the content address stays valid.
    assert_eq!(std::fs::read(&paths[0]).unwrap(), compressed);
}

#[tokio::test]
async fn cancellation_surfaces_as_a_distinct_error() {
    let server = MockServer::start().await;
    let downloader = downloader_for(&server).await;
    downloader.cancellation_token().cancel();

    let file = single_chunk_file("game.exe", b"abcdefghij", &zlib(b"abcdefghij"));
    let out = TempDir::new().unwrap();
    let err = downloader
        .download_item(&DepotItem::V2File(file), out.path(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, galaxy_cdn::Error::Cancelled));
}
