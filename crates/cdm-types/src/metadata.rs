//! Published-package metadata.
//!
//! The metadata document is what a `publish` stores off-chain for each
//! contract version; the registry only keeps its content id. Field names
//! follow the on-wire JSON shape consumed by registry frontends, so the
//! serialized form is stable across tools.

use serde::{Deserialize, Serialize};

/// One parameter of an ABI entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<AbiParam>>,
}

/// One constructor/method/event entry of a contract ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<AbiParam>>,
    #[serde(rename = "stateMutability", default, skip_serializing_if = "Option::is_none")]
    pub state_mutability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
}

/// The full metadata document published for one contract version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub publish_block: u64,
    pub published_at: String,
    pub description: String,
    pub readme: String,
    pub authors: Vec<String>,
    pub homepage: String,
    pub repository: String,
    pub abi: Vec<AbiEntry>,
}

impl Metadata {
    /// Serialized payload as stored on the bulletin chain.
    ///
    /// The same bytes are hashed locally for the pre-publish content id, so
    /// serialization must happen exactly once per document.
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("metadata serialization is infallible")
    }
}
