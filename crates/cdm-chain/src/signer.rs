//! Signing boundary.
//!
//! Real key management lives in the external client; the pipeline only
//! needs a stable account identity to submit under and to compare against
//! registry ownership. Dev accounts use the conventional `//Name` derive
//! paths, mapped deterministically onto addresses.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use cdm_types::Address;

type Blake2b256 = Blake2b<U32>;

/// An account that can sign submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    label: String,
    address: Address,
}

impl Signer {
    /// Well-known dev account (`Signer::dev("Alice")` signs as `//Alice`).
    pub fn dev(name: &str) -> Self {
        let path = format!("//{name}");
        let digest = Blake2b256::digest(path.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Self {
            label: path,
            address: Address::from_bytes(bytes),
        }
    }

    /// Signer from an explicit SURI-style derive path (`//Alice`) or a
    /// bare name.
    pub fn from_suri(suri: &str) -> Self {
        Self::dev(suri.strip_prefix("//").unwrap_or(suri))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_accounts_are_deterministic() {
        assert_eq!(Signer::dev("Alice"), Signer::dev("Alice"));
        assert_eq!(
            Signer::dev("Alice").address().to_string(),
            "0xd5ff0f426a579f700c533c2b29d3e8387bc9a47d"
        );
        assert_eq!(
            Signer::dev("Bob").address().to_string(),
            "0xfba7c0854b985b926093384ee104974cec0cf600"
        );
    }

    #[test]
    fn suri_prefix_is_optional() {
        assert_eq!(Signer::from_suri("//Alice"), Signer::dev("Alice"));
        assert_eq!(Signer::from_suri("Alice"), Signer::dev("Alice"));
        assert_eq!(Signer::from_suri("//Alice").label(), "//Alice");
    }

    #[test]
    fn distinct_accounts_get_distinct_addresses() {
        assert_ne!(Signer::dev("Alice").address(), Signer::dev("Bob").address());
    }
}
