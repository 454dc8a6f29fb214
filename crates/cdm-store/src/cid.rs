//! Content identifiers for off-chain payloads.
//!
//! The registry stores only a content id per published version; the
//! payload itself lives off-chain. Ids are CIDv1 over the raw codec with a
//! blake2b-256 multihash, rendered in lowercase base32 multibase - the
//! format the bulletin chain reports for stored blobs, so locally computed
//! ids can be compared byte-for-byte against chain events.
//!
//! Layout of the binary form:
//!
//! ```text
//! 0x01            CIDv1
//! 0x55            raw payload codec
//! 0xa0 0xe4 0x02  blake2b-256 multicodec (0xb220, varint)
//! 0x20            digest length (32)
//! <32-byte digest>
//! ```

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// blake2b with a 32-byte output.
type Blake2b256 = Blake2b<U32>;

const CID_VERSION: u8 = 0x01;
const RAW_CODEC: u8 = 0x55;
const BLAKE2B_256: u64 = 0xb220;
const DIGEST_LEN: u8 = 32;

/// RFC 4648 base32 alphabet, lowercase, as used by multibase `b`.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Compute the content id for a byte payload.
///
/// Deterministic: identical bytes yield identical ids, and any single-byte
/// change produces a different id. The digest is the full 32-byte
/// blake2b-256 output; nothing is truncated.
pub fn compute_cid(data: &[u8]) -> String {
    let digest = Blake2b256::digest(data);

    let mut bytes = Vec::with_capacity(6 + DIGEST_LEN as usize);
    bytes.push(CID_VERSION);
    bytes.push(RAW_CODEC);
    push_varint(&mut bytes, BLAKE2B_256);
    bytes.push(DIGEST_LEN);
    bytes.extend_from_slice(&digest);

    let mut out = String::with_capacity(1 + bytes.len() * 8 / 5 + 1);
    out.push('b');
    base32_lower(&bytes, &mut out);
    out
}

/// Unsigned LEB128, as multiformats varints are defined.
fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Unpadded lowercase base32.
fn base32_lower(bytes: &[u8], out: &mut String) {
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
}
