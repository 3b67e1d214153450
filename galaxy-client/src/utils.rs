//! Hashing, content-address path and compression helpers shared by every
//! subsystem that talks to the CDN.

use flate2::read::ZlibDecoder;
use std::io::Read;

use crate::{Error, Result};

/// Compute the lowercase hex MD5 of a byte slice
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

/// Split a content hash into the CDN directory layout `aa/bb/aabbcc...`
///
/// Hashes shorter than 4 characters are returned as-is; the CDN never
/// serves them but callers should not panic on malformed input.
pub fn galaxy_path(hash: &str) -> String {
    if hash.len() < 4 {
        return hash.to_string();
    }
    format!("{}/{}/{}", &hash[..2], &hash[2..4], hash)
}

/// Check whether a buffer starts with a valid zlib stream header (RFC 1950)
pub fn is_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let cmf = data[0] as u16;
    let flg = data[1] as u16;
    (data[0] & 0x0F) == 0x08 && (cmf * 256 + flg) % 31 == 0
}

/// Inflate a zlib stream (window-bits 15)
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::Io)?;
    Ok(out)
}

/// Inflate the body if it carries a zlib header, otherwise return it as-is
///
/// Manifest endpoints serve both plain and zlib-compressed JSON; the sniff
/// keeps callers agnostic.
pub fn maybe_inflate(data: Vec<u8>) -> Result<Vec<u8>> {
    if is_zlib(&data) { inflate(&data) } else { Ok(data) }
}

/// Compose an HTTP Range header value for `len` bytes starting at `offset`
pub fn range_header(offset: u64, len: u64) -> String {
    format!("bytes={}-{}", offset, offset + len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::ZlibEncoder};
    use std::io::Write;

    #[test]
    fn md5_hex_known_value() {
        assert_eq!(md5_hex(b"abcdefghij"), "e80b5017098950fc58aad83c8c14978e");
    }

    #[test]
    fn galaxy_path_splits_two_and_two() {
        assert_eq!(
            galaxy_path("e80b5017098950fc58aad83c8c14978e"),
            "e8/0b/e80b5017098950fc58aad83c8c14978e"
        );
        assert_eq!(galaxy_path("ab"), "ab");
    }

    #[test]
    fn zlib_sniff_and_roundtrip() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"abcdefghij").unwrap();
        let compressed = encoder.finish().unwrap();

        assert!(is_zlib(&compressed));
        assert!(!is_zlib(b"{\"plain\":true}"));

        assert_eq!(maybe_inflate(compressed).unwrap(), b"abcdefghij");
        let plain = b"plain".to_vec();
        assert_eq!(maybe_inflate(plain.clone()).unwrap(), plain);
    }

    #[test]
    fn range_header_is_inclusive() {
        assert_eq!(range_header(0, 1_048_576), "bytes=0-1048575");
        assert_eq!(range_header(100, 50), "bytes=100-149");
    }
}
