//! Value Codec: transparent compression/framing for stored values.
//!
//! `encode` chooses between storing a value raw or compressed based on
//! `CompressionConfig`, and tags the result with a one-byte header so that
//! `decode` never needs to consult the current config — a value encoded
//! under an old config (or a different node's config, during a rolling
//! upgrade) still decodes correctly.

use concord_core::{CompressionAlgorithm, CompressionConfig, Error, Result};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{Read, Write};

const TAG_RAW: u8 = 0x00;
const TAG_ZLIB: u8 = 0x01;
const TAG_GZIP: u8 = 0x02;

/// Compress (or pass through) `value` according to `cfg`, returning a
/// tagged byte string suitable for storage inside a `Record`.
pub fn encode(value: &[u8], cfg: &CompressionConfig) -> Vec<u8> {
    if !cfg.enabled || value.len() < cfg.threshold_bytes as usize {
        let mut out = Vec::with_capacity(value.len() + 1);
        out.push(TAG_RAW);
        out.extend_from_slice(value);
        return out;
    }

    let level = Compression::new(cfg.level.min(9));
    match cfg.algorithm {
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            // Writing to an in-memory Vec cannot fail.
            encoder.write_all(value).expect("in-memory zlib write");
            let compressed = encoder.finish().expect("in-memory zlib finish");
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(TAG_ZLIB);
            out.extend_from_slice(&compressed);
            out
        }
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(value).expect("in-memory gzip write");
            let compressed = encoder.finish().expect("in-memory gzip finish");
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(TAG_GZIP);
            out.extend_from_slice(&compressed);
            out
        }
    }
}

/// Reverse `encode`. Accepts any legal tag regardless of the caller's
/// current configuration: decoding is a pure function of the bytes, not
/// of runtime config.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
    let (&tag, body) = encoded
        .split_first()
        .ok_or_else(|| Error::MalformedEncoding("empty encoded value".into()))?;

    match tag {
        TAG_RAW => Ok(body.to_vec()),
        TAG_ZLIB => {
            let mut decoder = ZlibDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::MalformedEncoding(format!("zlib decode: {e}")))?;
            Ok(out)
        }
        TAG_GZIP => {
            let mut decoder = GzDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::MalformedEncoding(format!("gzip decode: {e}")))?;
            Ok(out)
        }
        other => Err(Error::MalformedEncoding(format!("unknown tag {other:#x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::CompressionAlgorithm;

    fn cfg(enabled: bool, algorithm: CompressionAlgorithm, threshold: u32) -> CompressionConfig {
        CompressionConfig {
            enabled,
            algorithm,
            threshold_bytes: threshold,
            level: 6,
        }
    }

    #[test]
    fn below_threshold_is_stored_raw() {
        let c = cfg(true, CompressionAlgorithm::Zlib, 1024);
        let encoded = encode(b"short", &c);
        assert_eq!(encoded[0], TAG_RAW);
        assert_eq!(decode(&encoded).unwrap(), b"short");
    }

    #[test]
    fn disabled_is_always_raw_even_above_threshold() {
        let c = cfg(false, CompressionAlgorithm::Zlib, 0);
        let big = vec![b'x'; 10_000];
        let encoded = encode(&big, &c);
        assert_eq!(encoded[0], TAG_RAW);
    }

    #[test]
    fn zlib_round_trips_above_threshold() {
        let c = cfg(true, CompressionAlgorithm::Zlib, 4);
        let value = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let encoded = encode(&value, &c);
        assert_eq!(encoded[0], TAG_ZLIB);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn gzip_round_trips_above_threshold() {
        let c = cfg(true, CompressionAlgorithm::Gzip, 4);
        let value = b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec();
        let encoded = encode(&value, &c);
        assert_eq!(encoded[0], TAG_GZIP);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn threshold_boundary_is_exclusive_on_the_raw_side() {
        // len == threshold is NOT below threshold, so it should compress.
        let c = cfg(true, CompressionAlgorithm::Zlib, 5);
        let value = b"aaaaa".to_vec(); // exactly 5 bytes
        let encoded = encode(&value, &c);
        assert_eq!(encoded[0], TAG_ZLIB);

        let value_short = b"aaaa".to_vec(); // 4 bytes, below threshold
        let encoded_short = encode(&value_short, &c);
        assert_eq!(encoded_short[0], TAG_RAW);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let bad = vec![0xFF, 1, 2, 3];
        assert!(matches!(decode(&bad), Err(Error::MalformedEncoding(_))));
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert!(matches!(decode(&[]), Err(Error::MalformedEncoding(_))));
    }

    #[test]
    fn decode_accepts_any_tag_regardless_of_current_config() {
        // Encode with gzip, but decode should work even if a hypothetical
        // "current config" points elsewhere -- decode takes no config at all.
        let c = cfg(true, CompressionAlgorithm::Gzip, 1);
        let value = b"cccccccccccccccccccccccccccccc".to_vec();
        let encoded = encode(&value, &c);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_identity_raw(bytes: Vec<u8>) {
            let c = cfg(false, CompressionAlgorithm::Zlib, 0);
            let encoded = encode(&bytes, &c);
            let decoded = decode(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded, bytes);
        }

        #[test]
        fn round_trip_identity_compressed(bytes: Vec<u8>) {
            let c = cfg(true, CompressionAlgorithm::Zlib, 0);
            let encoded = encode(&bytes, &c);
            let decoded = decode(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded, bytes);
        }
    }
}
