//! Contract and account addresses.
//!
//! This module is the canonical source for address handling in the
//! workspace. Other crates should import from here rather than defining
//! their own parsing logic.
//!
//! Addresses on the execution layer are 20-byte values, written as
//! `0x`-prefixed lowercase hex (40 hex characters). The all-zero address is
//! reserved as the bootstrap sentinel: it is injected into the registry
//! contract's own build, where no registry exists yet, and must never be
//! confused with a real deployment.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Byte width of an address.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte contract or account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

/// Failure to parse a textual address.
#[derive(Debug, Error)]
#[error("invalid address {input:?}: {reason}")]
pub struct AddressParseError {
    pub input: String,
    pub reason: String,
}

impl Address {
    /// The all-zero bootstrap sentinel.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// Parse a `0x`-prefixed (or bare) 40-character hex address.
    ///
    /// Unlike chain-side decoding this never pads or truncates: a value of
    /// the wrong width is an error, so a short id can't silently alias a
    /// real address.
    pub fn parse(input: &str) -> Result<Self, AddressParseError> {
        let trimmed = input.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if hex_part.len() != ADDRESS_LEN * 2 {
            return Err(AddressParseError {
                input: input.to_string(),
                reason: format!("expected {} hex characters, got {}", ADDRESS_LEN * 2, hex_part.len()),
            });
        }
        let bytes = hex::decode(hex_part).map_err(|e| AddressParseError {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(D::Error::custom)
    }
}
