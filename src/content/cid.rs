//! Content identifier shapes
//!
//! Two shapes are recognised:
//! - CIDv0: `Qm` followed by 44 base58btc characters (46 total)
//! - CIDv1 in base32 multibase: `b` followed by at least 58 lowercase base32 characters

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static CID_V0: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Qm[1-9A-HJ-NP-Za-km-z]{44}$").expect("CIDv0 pattern is valid"));

static CID_V1_BASE32: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^b[a-z2-7]{58,}$").expect("CIDv1 pattern is valid"));

/// CIDv1 version byte
const CID_VERSION_1: u8 = 0x01;
/// multicodec `raw`
const CODEC_RAW: u8 = 0x55;
/// multihash `sha2-256` and its digest length
const MULTIHASH_SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Pure syntactic check, no network call
pub fn is_valid_cid(cid: &str) -> bool {
    CID_V0.is_match(cid) || CID_V1_BASE32.is_match(cid)
}

/// Compute the CIDv1 (raw codec, sha2-256) of a payload.
///
/// Matches what an IPFS node reports for the same bytes added with
/// `--raw-leaves --cid-version=1` as a single block.
pub fn compute_cid_v1(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);

    let mut binary = Vec::with_capacity(4 + digest.len());
    binary.extend_from_slice(&[CID_VERSION_1, CODEC_RAW, MULTIHASH_SHA2_256, SHA2_256_LEN]);
    binary.extend_from_slice(&digest);

    format!("b{}", base32_lower(&binary))
}

/// RFC 4648 base32, lowercase, unpadded
fn base32_lower(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }

    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_cid_v0() {
        assert!(is_valid_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
    }

    #[test]
    fn test_accepts_cid_v1() {
        assert!(is_valid_cid(
            "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi"
        ));
        assert!(is_valid_cid(
            "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq"
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(!is_valid_cid(""));
        assert!(!is_valid_cid("not-a-cid"));
        assert!(!is_valid_cid("QmTestCID123"));
        // base58 excludes 0, O, I and l
        assert!(!is_valid_cid("Qm0wAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        // uppercase is not part of the base32 multibase alphabet
        assert!(!is_valid_cid(
            "BAFYBEIGDYRZT5SFP7UDM7HU76UH7Y26NF3EFUYLQABF3OCLGTQY55FBZDI"
        ));
        assert!(!is_valid_cid(" bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi"));
    }

    #[test]
    fn test_compute_cid_v1_known_vector() {
        assert_eq!(
            compute_cid_v1(b"hello"),
            "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq"
        );
    }

    #[test]
    fn test_computed_cids_are_valid() {
        for payload in [&b""[..], b"{}", b"{\"name\":\"Bot A\"}"] {
            assert!(is_valid_cid(&compute_cid_v1(payload)));
        }
    }

    #[test]
    fn test_base32_lower() {
        assert_eq!(base32_lower(b""), "");
        assert_eq!(base32_lower(b"f"), "my");
        assert_eq!(base32_lower(b"fo"), "mzxq");
        assert_eq!(base32_lower(b"foobar"), "mzxw6ytboi");
    }
}
