//! Pack/unpack round-trip, determinism and multi-part splitting

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::{Compression, write::ZlibEncoder};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use walkdir::WalkDir;

use galaxy_client::utils::{galaxy_path, md5_hex};
use rgog_archive::{Archive, ExtractOptions, PackOptions, UnpackOptions, extract, pack, unpack};

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn write_blob(root: &Path, prefix: &str, hash: &str, bytes: &[u8]) {
    let path = root.join(prefix).join(galaxy_path(hash));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Compress, content-address and store a meta JSON; returns its hash
fn add_meta(root: &Path, value: &Value) -> String {
    let compressed = zlib(value.to_string().as_bytes());
    let hash = md5_hex(&compressed);
    write_blob(root, "v2/meta", &hash, &compressed);
    hash
}

/// Compress, content-address and store a chunk; returns its hash
fn add_chunk(root: &Path, product_id: &str, plain: &[u8]) -> String {
    let compressed = zlib(plain);
    let hash = md5_hex(&compressed);
    write_blob(
        root,
        &format!("v2/store/{product_id}"),
        &hash,
        &compressed,
    );
    hash
}

fn chunk_record(root: &Path, product_id: &str, plain: &[u8]) -> (String, Value) {
    let compressed = zlib(plain);
    let hash = add_chunk(root, product_id, plain);
    let record = json!({
        "compressedMd5": hash,
        "compressedSize": compressed.len(),
        "md5": md5_hex(plain),
        "size": plain.len(),
    });
    (hash, record)
}

/// A minimal but complete tree: one build, one depot, one chunked file
fn sample_tree(root: &Path) -> (String, String, String) {
    let plain = b"abcdefghij";
    let (chunk_hash, chunk) = chunk_record(root, "1234", plain);

    let depot_manifest = json!({
        "depot": {
            "items": [{
                "type": "DepotFile",
                "path": "game.exe",
                "md5": md5_hex(plain),
                "chunks": [chunk],
            }],
        },
    });
    let depot_hash = add_meta(root, &depot_manifest);

    let repository = json!({
        "baseProductId": "1234",
        "buildId": "77",
        "platform": "windows",
        "installDirectory": "Game",
        "depots": [{
            "productId": "1234",
            "manifest": depot_hash,
            "languages": ["en-US"],
            "size": 10,
            "compressedSize": 18,
        }],
    });
    let repo_hash = add_meta(root, &repository);

    (repo_hash, depot_hash, chunk_hash)
}

/// Collect `relative path -> bytes` for a subtree
fn tree_contents(root: &Path, prefix: &str) -> Vec<(PathBuf, Vec<u8>)> {
    let base = root.join(prefix);
    let mut entries = Vec::new();
    if !base.exists() {
        return entries;
    }
    for entry in WalkDir::new(&base).sort_by_file_name() {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            entries.push((
                entry.path().strip_prefix(root).unwrap().to_path_buf(),
                std::fs::read(entry.path()).unwrap(),
            ));
        }
    }
    entries
}

#[test]
fn pack_then_unpack_is_a_bitwise_identity() {
    let input = TempDir::new().unwrap();
    sample_tree(input.path());

    let out = TempDir::new().unwrap();
    let summary = pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions {
            max_part_size: 1024 * 1024,
        },
    )
    .unwrap();
    assert_eq!(summary.parts.len(), 1);
    assert_eq!(summary.builds, 1);
    assert_eq!(summary.chunks, 1);

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let restored = TempDir::new().unwrap();
    unpack(&archive, restored.path(), &UnpackOptions::default()).unwrap();

    for prefix in ["v2/meta", "v2/store"] {
        assert_eq!(
            tree_contents(input.path(), prefix),
            tree_contents(restored.path(), prefix),
            "{prefix} differs after round-trip"
        );
    }
}

#[test]
fn packing_is_deterministic_across_runs() {
    let input = TempDir::new().unwrap();
    sample_tree(input.path());
    // A second product's chunks exercise product ordering too.
    add_chunk(input.path(), "99", b"other product data");

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("a.rgog"),
        &PackOptions::default(),
    )
    .unwrap();
    pack(
        input.path(),
        &out.path().join("b.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let a = std::fs::read(out.path().join("a.rgog")).unwrap();
    let b = std::fs::read(out.path().join("b.rgog")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn tiny_part_bound_gives_every_chunk_its_own_part() {
    let input = TempDir::new().unwrap();
    sample_tree(input.path());
    add_chunk(input.path(), "1234", b"second chunk body");
    add_chunk(input.path(), "1234", b"third chunk body, longer than the others");

    let out = TempDir::new().unwrap();
    let summary = pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions { max_part_size: 1 },
    )
    .unwrap();

    // Part 0 holds the metadata and build files; three oversized chunks
    // each occupy a part of their own.
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.parts.len(), 4);
    assert!(out.path().join("out.rgog").exists());
    assert!(out.path().join("out.part1.rgog").exists());
    assert!(out.path().join("out.part3.rgog").exists());

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    assert_eq!(archive.header().total_parts, 4);
    archive.verify(false).unwrap();

    let restored = TempDir::new().unwrap();
    unpack(&archive, restored.path(), &UnpackOptions::default()).unwrap();
    for prefix in ["v2/meta", "v2/store"] {
        assert_eq!(
            tree_contents(input.path(), prefix),
            tree_contents(restored.path(), prefix)
        );
    }
}

#[test]
fn listing_reports_build_os_and_languages() {
    let input = TempDir::new().unwrap();
    let (repo_hash, _, _) = sample_tree(input.path());

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let listing = archive.list();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].build_id, 77);
    assert_eq!(listing[0].os, "windows");
    assert_eq!(listing[0].repository, repo_hash);
    assert_eq!(listing[0].manifest_count, 1);
    assert_eq!(listing[0].languages, vec!["en-US"]);

    let stats = archive.stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.products, vec![1234]);
}

#[test]
fn full_verify_detects_a_flipped_chunk_byte() {
    let input = TempDir::new().unwrap();
    let (_, _, chunk_hash) = sample_tree(input.path());

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let part0 = out.path().join("out.rgog");
    {
        let archive = Archive::open(&part0).unwrap();
        archive.verify(true).unwrap();
        archive.verify(false).unwrap();
    }

    // Flip the last data byte: that lands inside ChunkFiles.
    let mut bytes = std::fs::read(&part0).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&part0, &bytes).unwrap();

    let archive = Archive::open(&part0).unwrap();
    archive.verify(true).unwrap();
    let err = archive.verify(false).unwrap_err();
    match err {
        rgog_archive::Error::HashMismatch { resource, .. } => {
            assert!(resource.contains(&chunk_hash));
        }
        other => panic!("expected hash mismatch, got {other:?}"),
    }
}

#[test]
fn reassemble_materialises_chunked_files() {
    let input = TempDir::new().unwrap();
    sample_tree(input.path());

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let game = TempDir::new().unwrap();
    extract(
        &archive,
        game.path(),
        &ExtractOptions {
            build_id: Some(77),
            reassemble: true,
            chunks_only: false,
        },
    )
    .unwrap();

    assert_eq!(
        std::fs::read(game.path().join("game.exe")).unwrap(),
        b"abcdefghij"
    );
}

#[test]
fn reassemble_slices_container_members() {
    let input = TempDir::new().unwrap();

    let container: Vec<u8> = [vec![b'A'; 178], vec![b'B'; 241]].concat();
    let (_, container_chunk) = chunk_record(input.path(), "1234", &container);

    let depot_manifest = json!({
        "depot": {
            "smallFilesContainer": {"chunks": [container_chunk]},
            "items": [
                {
                    "type": "DepotFile",
                    "path": "a.txt",
                    "md5": md5_hex(&container[..178]),
                    "sfcRef": {"offset": 0, "size": 178},
                },
                {
                    "type": "DepotFile",
                    "path": "b.txt",
                    "md5": md5_hex(&container[178..]),
                    "sfcRef": {"offset": 178, "size": 241},
                },
            ],
        },
    });
    let depot_hash = add_meta(input.path(), &depot_manifest);
    add_meta(
        input.path(),
        &json!({
            "baseProductId": "1234",
            "buildId": "5",
            "platform": "linux",
            "depots": [{
                "productId": "1234",
                "manifest": depot_hash,
                "languages": ["*"],
            }],
        }),
    );

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let game = TempDir::new().unwrap();
    extract(
        &archive,
        game.path(),
        &ExtractOptions {
            build_id: Some(5),
            reassemble: true,
            chunks_only: false,
        },
    )
    .unwrap();

    assert_eq!(std::fs::read(game.path().join("a.txt")).unwrap(), vec![b'A'; 178]);
    assert_eq!(std::fs::read(game.path().join("b.txt")).unwrap(), vec![b'B'; 241]);
}

#[test]
fn unknown_build_id_is_not_found() {
    let input = TempDir::new().unwrap();
    sample_tree(input.path());

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let err = extract(
        &archive,
        Path::new("/nonexistent-unused"),
        &ExtractOptions {
            build_id: Some(9999),
            reassemble: false,
            chunks_only: false,
        },
    )
    .unwrap_err();
    assert!(matches!(err, rgog_archive::Error::NotFound { .. }));
}

#[test]
fn chunks_only_extract_writes_no_meta() {
    let input = TempDir::new().unwrap();
    sample_tree(input.path());

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let restored = TempDir::new().unwrap();
    extract(
        &archive,
        restored.path(),
        &ExtractOptions {
            build_id: None,
            reassemble: false,
            chunks_only: true,
        },
    )
    .unwrap();

    assert!(!restored.path().join("v2/meta").exists());
    assert_eq!(
        tree_contents(input.path(), "v2/store"),
        tree_contents(restored.path(), "v2/store")
    );
}

#[test]
fn debug_unpack_writes_pretty_json_copies() {
    let input = TempDir::new().unwrap();
    let (repo_hash, depot_hash, _) = sample_tree(input.path());

    let out = TempDir::new().unwrap();
    pack(
        input.path(),
        &out.path().join("out.rgog"),
        &PackOptions::default(),
    )
    .unwrap();

    let archive = Archive::open(&out.path().join("out.rgog")).unwrap();
    let restored = TempDir::new().unwrap();
    unpack(
        &archive,
        restored.path(),
        &UnpackOptions {
            debug: true,
            chunks_only: false,
        },
    )
    .unwrap();

    let repo_copy = restored
        .path()
        .join("debug")
        .join(format!("{repo_hash}_repository.json"));
    let manifest_copy = restored
        .path()
        .join("debug")
        .join(format!("{depot_hash}_manifest.json"));
    assert!(repo_copy.exists());
    assert!(manifest_copy.exists());

    let pretty: Value =
        serde_json::from_slice(&std::fs::read(repo_copy).unwrap()).unwrap();
    assert_eq!(pretty["buildId"], "77");
}
