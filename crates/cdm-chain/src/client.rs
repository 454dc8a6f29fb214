//! The external chain client interface.
//!
//! Implementations wrap whatever wire protocol the target chain speaks.
//! The pipeline only relies on two things:
//!
//! - [`ChainClient::submit`] submits one call and resolves after
//!   finalization, returning the decoded events; an included-but-reverted
//!   extrinsic resolves to [`ChainError::Reverted`] with the on-chain
//!   reason verbatim
//! - the read-only registry queries return typed values, where an
//!   unregistered name is `None` (or a zero version count) - never a
//!   zero-address default that could alias a real entry
//!
//! [`Call::BatchAll`] is the atomic multi-call: either every inner call
//! takes effect or none does.

use async_trait::async_trait;

use cdm_types::error::ChainError;
use cdm_types::Address;

/// A transaction payload at the chain boundary.
#[derive(Debug, Clone)]
pub enum Call {
    /// Instantiate a contract from a compiled artifact.
    Instantiate { code: Vec<u8> },

    /// Append a version to a registry entry, creating the entry (owned by
    /// the caller) if the name is new.
    PublishLatest {
        registry: Address,
        name: String,
        address: Address,
        metadata_uri: String,
    },

    /// Store a metadata payload on the bulletin side.
    StoreMetadata { payload: Vec<u8> },

    /// Atomic multi-call: all inner calls apply, or none.
    BatchAll { calls: Vec<Call> },
}

/// Events decoded from a finalized extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A contract instance was created.
    Instantiated { contract: Address },

    /// A metadata payload was stored; `cid` is the chain-computed content id.
    Stored { cid: String },

    /// A registry entry gained a version.
    Published { name: String, version: u32 },
}

/// Finalization receipt for one submitted extrinsic.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub tx_hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub events: Vec<ChainEvent>,
}

/// Submission and typed state queries against one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a call signed by `signer` and wait for finalization.
    async fn submit(&self, signer: &crate::signer::Signer, call: Call)
        -> Result<Finalized, ChainError>;

    /// Number of versions published under `name`; 0 means the name does
    /// not exist (version 0 itself never does).
    async fn registry_version_count(
        &self,
        registry: &Address,
        name: &str,
    ) -> Result<u32, ChainError>;

    /// Address published as `version` (1-based) of `name`.
    async fn registry_address_at(
        &self,
        registry: &Address,
        name: &str,
        version: u32,
    ) -> Result<Option<Address>, ChainError>;

    /// Metadata URI published as `version` (1-based) of `name`.
    async fn registry_metadata_uri_at(
        &self,
        registry: &Address,
        name: &str,
        version: u32,
    ) -> Result<Option<String>, ChainError>;

    /// Account that owns `name`, i.e. published its first version.
    async fn registry_owner(
        &self,
        registry: &Address,
        name: &str,
    ) -> Result<Option<Address>, ChainError>;

    /// Total number of registered names.
    async fn registry_contract_count(&self, registry: &Address) -> Result<u32, ChainError>;

    /// Name at `index` in registration order.
    async fn registry_contract_name_at(
        &self,
        registry: &Address,
        index: u32,
    ) -> Result<Option<String>, ChainError>;

    /// Fetch a stored payload by content id from the bulletin gateway.
    async fn fetch_blob(&self, cid: &str) -> Result<Option<Vec<u8>>, ChainError>;
}
