//! Deployment-target hashing.
//!
//! Build artifacts and installed packages are partitioned by where they
//! were built for: a local dev chain, preview-net and mainnet must never
//! share cached addresses. The partition key is a short hash over the
//! endpoints and the registry binding. It is a cache key, not a security
//! boundary - eight bytes keep directory names readable while making
//! accidental collisions between real environments vanishingly unlikely.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use cdm_types::network::NetworkTarget;

type Blake2b256 = Blake2b<U32>;

/// Number of digest bytes kept in the key.
const TARGET_HASH_LEN: usize = 8;

/// Derive the partition key for a deployment target.
///
/// Any change to the asset-hub endpoint, the gateway, or the registry
/// binding yields a different key; an unbootstrapped target hashes with
/// the zero-address sentinel.
pub fn compute_target_hash(target: &NetworkTarget) -> String {
    let input = format!(
        "{}\n{}\n{}",
        target.assethub_url,
        target.ipfs_gateway_url,
        target.registry_or_zero()
    );
    let digest = Blake2b256::digest(input.as_bytes());
    hex::encode(&digest[..TARGET_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdm_types::Address;

    fn target(assethub: &str, gateway: &str, registry: Option<&str>) -> NetworkTarget {
        NetworkTarget {
            assethub_url: assethub.to_string(),
            ipfs_gateway_url: gateway.to_string(),
            registry_address: registry.map(|r| Address::parse(r).unwrap()),
        }
    }

    // Golden values computed with the reference implementation.
    #[test]
    fn matches_reference_vectors() {
        assert_eq!(
            compute_target_hash(&target(
                "ws://127.0.0.1:10020",
                "http://127.0.0.1:8283/ipfs",
                Some("0x2c6fc00458f198f46ef072e1516b83cd56db7cf5"),
            )),
            "d2030e673464dda4"
        );
        assert_eq!(
            compute_target_hash(&target(
                "wss://previewnet.substrate.dev/asset-hub",
                "https://previewnet.substrate.dev/ipfs",
                Some("0x2c6fc00458f198f46ef072e1516b83cd56db7cf5"),
            )),
            "6bb9e50b5d606932"
        );
    }

    #[test]
    fn sixteen_hex_chars() {
        let hash = compute_target_hash(&target("ws://a", "http://b", None));
        assert_eq!(hash.len(), 16);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn registry_binding_partitions_the_key() {
        let unbound = compute_target_hash(&target("ws://a", "http://b", None));
        let bound = compute_target_hash(&target(
            "ws://a",
            "http://b",
            Some("0x21fa63bfac2a77b1a6de8bd9a0c2c172a48bb5e3"),
        ));
        assert_ne!(unbound, bound);
    }
}
