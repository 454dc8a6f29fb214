//! In-process sandbox chain.
//!
//! A complete [`ChainClient`] backed by in-memory state: contracts get
//! deterministic addresses, the registry contract's storage semantics are
//! implemented faithfully (owner checks, dense 1-based versions,
//! registration-order name index), and stored metadata payloads are
//! content-addressed with the same CID format the bulletin chain uses.
//!
//! Local development runs deploy against a sandbox persisted to a state
//! file, which makes repeated pipeline invocations observable end-to-end
//! without a node; tests use it directly as an in-memory fixture.
//!
//! Transactions are atomic: a submission either applies entirely or
//! leaves the chain untouched, and `BatchAll` extends that to every inner
//! call - one failing publish rolls back the whole batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cdm_store::{atomic_write, compute_cid};
use cdm_types::error::ChainError;
use cdm_types::Address;

use crate::client::{Call, ChainClient, ChainEvent, Finalized};
use crate::signer::Signer;

type Blake2b256 = Blake2b<U32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    address: Address,
    metadata_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEntryState {
    owner: Address,
    versions: Vec<VersionRecord>,
}

/// Storage of one registry contract instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    /// Names in registration order (the enumeration index).
    names: Vec<String>,
    entries: HashMap<String, RegistryEntryState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChainState {
    block_number: u64,
    nonce: u64,
    /// Deployed contracts: address -> content id of their code.
    contracts: HashMap<Address, String>,
    /// Registry storage, lazily created per deployed registry contract.
    registries: HashMap<Address, RegistryState>,
    /// Bulletin blobs by content id.
    blobs: HashMap<String, Vec<u8>>,
}

/// In-memory chain with optional state-file persistence.
pub struct SandboxChain {
    state: RwLock<ChainState>,
    fail_next: Mutex<Option<String>>,
    state_file: Option<PathBuf>,
}

impl Default for SandboxChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxChain {
    /// Fresh chain, in-memory only.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            fail_next: Mutex::new(None),
            state_file: None,
        }
    }

    /// Chain persisted to `path`; existing state is loaded, a missing
    /// file starts a fresh chain.
    pub fn with_state_file(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ChainError::Transport(format!("corrupt sandbox state: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ChainState::default(),
            Err(e) => return Err(ChainError::Transport(e.to_string())),
        };
        Ok(Self {
            state: RwLock::new(state),
            fail_next: Mutex::new(None),
            state_file: Some(path),
        })
    }

    /// Make the next submission fail at the pool (rejected, not reverted).
    pub fn fail_next_submit(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    /// Number of contracts instantiated so far.
    pub fn deployed_count(&self) -> usize {
        self.state.read().contracts.len()
    }

    fn persist(&self) -> Result<(), ChainError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let state = self.state.read();
        let json = serde_json::to_vec_pretty(&*state)
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        atomic_write(path, &json).map_err(|e| ChainError::Transport(e.to_string()))
    }

    fn registry_entry<'a>(
        state: &'a ChainState,
        registry: &Address,
        name: &str,
    ) -> Option<&'a RegistryEntryState> {
        state.registries.get(registry)?.entries.get(name)
    }
}

fn hash_hex(input: &str) -> String {
    format!("0x{}", hex::encode(Blake2b256::digest(input.as_bytes())))
}

fn derive_contract_address(deployer: Address, nonce: u64) -> Address {
    let mut hasher = Blake2b256::new();
    hasher.update(deployer.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[..20]);
    Address::from_bytes(bytes)
}

/// Apply one call to the working state; `Err` is the revert reason and the
/// caller discards the working state.
fn apply(state: &mut ChainState, caller: Address, call: &Call) -> Result<Vec<ChainEvent>, String> {
    match call {
        Call::Instantiate { code } => {
            state.nonce += 1;
            let address = derive_contract_address(caller, state.nonce);
            state.contracts.insert(address, compute_cid(code));
            Ok(vec![ChainEvent::Instantiated { contract: address }])
        }

        Call::PublishLatest { registry, name, address, metadata_uri } => {
            if !state.contracts.contains_key(registry) {
                return Err(format!("no contract instantiated at {registry}"));
            }
            let storage = state.registries.entry(*registry).or_default();
            match storage.entries.get(name) {
                Some(entry) if entry.owner != caller => {
                    return Err(format!(
                        "publish_latest: caller {caller} is not the owner of \"{name}\""
                    ));
                }
                Some(_) => {}
                None => {
                    storage.names.push(name.clone());
                    storage.entries.insert(
                        name.clone(),
                        RegistryEntryState { owner: caller, versions: Vec::new() },
                    );
                }
            }
            let entry = storage
                .entries
                .get_mut(name)
                .expect("entry exists after ownership check");
            entry.versions.push(VersionRecord {
                address: *address,
                metadata_uri: metadata_uri.clone(),
            });
            Ok(vec![ChainEvent::Published {
                name: name.clone(),
                version: entry.versions.len() as u32,
            }])
        }

        Call::StoreMetadata { payload } => {
            let cid = compute_cid(payload);
            state.blobs.insert(cid.clone(), payload.clone());
            Ok(vec![ChainEvent::Stored { cid }])
        }

        Call::BatchAll { calls } => {
            let mut events = Vec::new();
            for call in calls {
                events.extend(apply(state, caller, call)?);
            }
            Ok(events)
        }
    }
}

#[async_trait]
impl ChainClient for SandboxChain {
    async fn submit(&self, signer: &Signer, call: Call) -> Result<Finalized, ChainError> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(ChainError::Rejected { reason });
        }

        let finalized = {
            let mut state = self.state.write();
            // apply against a copy so a revert leaves the chain untouched,
            // including every inner call of a batch
            let mut working = state.clone();
            working.block_number += 1;
            let events = apply(&mut working, signer.address(), &call)
                .map_err(|reason| ChainError::Reverted { reason })?;
            let tx_hash = hash_hex(&format!("tx:{}:{}", working.block_number, working.nonce));
            let block_hash = hash_hex(&format!("block:{}", working.block_number));
            let block_number = working.block_number;
            *state = working;
            Finalized {
                tx_hash,
                block_hash,
                block_number,
                events,
            }
        };

        self.persist()?;
        debug!(tx = %finalized.tx_hash, block = finalized.block_number, "sandbox extrinsic finalized");
        Ok(finalized)
    }

    async fn registry_version_count(
        &self,
        registry: &Address,
        name: &str,
    ) -> Result<u32, ChainError> {
        let state = self.state.read();
        Ok(Self::registry_entry(&state, registry, name)
            .map(|e| e.versions.len() as u32)
            .unwrap_or(0))
    }

    async fn registry_address_at(
        &self,
        registry: &Address,
        name: &str,
        version: u32,
    ) -> Result<Option<Address>, ChainError> {
        if version == 0 {
            return Ok(None);
        }
        let state = self.state.read();
        Ok(Self::registry_entry(&state, registry, name)
            .and_then(|e| e.versions.get(version as usize - 1))
            .map(|v| v.address))
    }

    async fn registry_metadata_uri_at(
        &self,
        registry: &Address,
        name: &str,
        version: u32,
    ) -> Result<Option<String>, ChainError> {
        if version == 0 {
            return Ok(None);
        }
        let state = self.state.read();
        Ok(Self::registry_entry(&state, registry, name)
            .and_then(|e| e.versions.get(version as usize - 1))
            .map(|v| v.metadata_uri.clone()))
    }

    async fn registry_owner(
        &self,
        registry: &Address,
        name: &str,
    ) -> Result<Option<Address>, ChainError> {
        let state = self.state.read();
        Ok(Self::registry_entry(&state, registry, name).map(|e| e.owner))
    }

    async fn registry_contract_count(&self, registry: &Address) -> Result<u32, ChainError> {
        let state = self.state.read();
        Ok(state
            .registries
            .get(registry)
            .map(|r| r.names.len() as u32)
            .unwrap_or(0))
    }

    async fn registry_contract_name_at(
        &self,
        registry: &Address,
        index: u32,
    ) -> Result<Option<String>, ChainError> {
        let state = self.state.read();
        Ok(state
            .registries
            .get(registry)
            .and_then(|r| r.names.get(index as usize))
            .cloned())
    }

    async fn fetch_blob(&self, cid: &str) -> Result<Option<Vec<u8>>, ChainError> {
        let state = self.state.read();
        Ok(state.blobs.get(cid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::Deployer;
    use crate::publisher::MetadataPublisher;
    use crate::registry::{PublishEntry, Registry};
    use std::sync::Arc;

    use cdm_types::error::RegistryError;
    use cdm_types::Metadata;

    async fn deploy_registry(chain: &Arc<SandboxChain>, signer: &Signer) -> Address {
        let finalized = chain
            .submit(signer, Call::Instantiate { code: b"registry code".to_vec() })
            .await
            .unwrap();
        match &finalized.events[0] {
            ChainEvent::Instantiated { contract } => *contract,
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn entry(name: &str, seed: u8) -> PublishEntry {
        PublishEntry {
            name: name.to_string(),
            address: Address::from_bytes([seed; 20]),
            metadata_uri: format!("bafk-{name}-{seed}"),
        }
    }

    #[tokio::test]
    async fn publish_creates_entry_with_caller_as_owner() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let registry_addr = deploy_registry(&chain, &alice).await;
        let registry = Registry::new(chain.clone(), registry_addr, alice.clone());

        assert_eq!(registry.version_count("@example/counter").await.unwrap(), 0);
        registry.publish(&entry("@example/counter", 1)).await.unwrap();

        assert_eq!(registry.version_count("@example/counter").await.unwrap(), 1);
        assert_eq!(
            registry.owner("@example/counter").await.unwrap(),
            Some(alice.address())
        );
    }

    #[tokio::test]
    async fn versions_are_dense_and_latest_tracks_count() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let registry_addr = deploy_registry(&chain, &alice).await;
        let registry = Registry::new(chain.clone(), registry_addr, alice);

        for seed in 1..=3u8 {
            registry.publish(&entry("@example/counter", seed)).await.unwrap();
        }

        let count = registry.version_count("@example/counter").await.unwrap();
        assert_eq!(count, 3);
        // every version 1..=count exists, version 0 never does
        assert_eq!(registry.address_at("@example/counter", 0).await.unwrap(), None);
        for v in 1..=count {
            assert!(registry.address_at("@example/counter", v).await.unwrap().is_some());
        }
        assert_eq!(registry.address_at("@example/counter", 4).await.unwrap(), None);
        // get-latest == get-at-version(count)
        assert_eq!(
            registry.address("@example/counter").await.unwrap(),
            registry.address_at("@example/counter", count).await.unwrap()
        );
        assert_eq!(
            registry.metadata_uri("@example/counter").await.unwrap(),
            registry.metadata_uri_at("@example/counter", count).await.unwrap()
        );
    }

    #[tokio::test]
    async fn non_owner_publish_is_rejected_verbatim() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let bob = Signer::dev("Bob");
        let registry_addr = deploy_registry(&chain, &alice).await;

        let as_alice = Registry::new(chain.clone(), registry_addr, alice);
        let as_bob = Registry::new(chain.clone(), registry_addr, bob.clone());

        as_alice.publish(&entry("@example/counter", 1)).await.unwrap();
        let err = as_bob.publish(&entry("@example/counter", 2)).await.unwrap_err();
        match err {
            RegistryError::Rejected { name, reason } => {
                assert_eq!(name, "@example/counter");
                assert!(reason.contains("is not the owner"));
                assert!(reason.contains(&bob.address().to_string()));
            }
            other => panic!("expected Rejected, got {other}"),
        }
        // the rejected publish changed nothing
        assert_eq!(as_alice.version_count("@example/counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_publish_is_atomic() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let bob = Signer::dev("Bob");
        let registry_addr = deploy_registry(&chain, &alice).await;

        let as_alice = Registry::new(chain.clone(), registry_addr, alice);
        let as_bob = Registry::new(chain.clone(), registry_addr, bob);

        // bob owns "theirs"; alice owns "mine"
        as_bob.publish(&entry("theirs", 9)).await.unwrap();
        as_alice.publish(&entry("mine", 1)).await.unwrap();

        // middle entry fails the ownership check; entries before and after
        // it must not land either
        let batch = vec![entry("mine", 2), entry("theirs", 3), entry("fresh", 4)];
        let err = as_alice.publish_batch(&batch).await.unwrap_err();
        assert!(matches!(err, RegistryError::BatchFailed { .. }));

        assert_eq!(as_alice.version_count("mine").await.unwrap(), 1);
        assert_eq!(as_alice.version_count("theirs").await.unwrap(), 1);
        assert_eq!(as_alice.version_count("fresh").await.unwrap(), 0);

        // the same batch without the offending entry applies in one go
        as_alice
            .publish_batch(&[entry("mine", 2), entry("fresh", 4)])
            .await
            .unwrap();
        assert_eq!(as_alice.version_count("mine").await.unwrap(), 2);
        assert_eq!(as_alice.version_count("fresh").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn absent_names_are_distinguished_from_entries() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let registry_addr = deploy_registry(&chain, &alice).await;
        let registry = Registry::new(chain.clone(), registry_addr, alice);

        assert_eq!(registry.address("nonexistent").await.unwrap(), None);
        assert_eq!(registry.owner("nonexistent").await.unwrap(), None);
        assert_eq!(registry.version_count("nonexistent").await.unwrap(), 0);
        assert_eq!(registry.metadata_uri("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn enumeration_follows_registration_order() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let registry_addr = deploy_registry(&chain, &alice).await;
        let registry = Registry::new(chain.clone(), registry_addr, alice);

        for name in ["zeta", "alpha", "mid"] {
            registry.publish(&entry(name, 1)).await.unwrap();
        }
        // a second version must not re-index the name
        registry.publish(&entry("zeta", 2)).await.unwrap();

        assert_eq!(registry.contract_count().await.unwrap(), 3);
        assert_eq!(
            registry.contract_names().await.unwrap(),
            vec!["zeta", "alpha", "mid"]
        );
        assert_eq!(registry.contract_name_at(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stored_metadata_is_content_addressed() {
        let chain = Arc::new(SandboxChain::new());
        let alice = Signer::dev("Alice");
        let publisher = MetadataPublisher::new(chain.clone(), alice);

        let metadata = Metadata {
            publish_block: 0,
            published_at: "2026-01-01T00:00:00Z".to_string(),
            description: "shared counter".to_string(),
            readme: String::new(),
            authors: vec![],
            homepage: String::new(),
            repository: String::new(),
            abi: vec![],
        };
        let published = publisher.publish(&metadata).await.unwrap();
        assert_eq!(published.cids.len(), 1);
        // the chain-reported id is the id of the payload bytes
        assert_eq!(published.cids[0], compute_cid(&metadata.to_payload()));
        // and the payload is fetchable by it
        let blob = chain.fetch_blob(&published.cids[0]).await.unwrap().unwrap();
        assert_eq!(blob, metadata.to_payload());
    }

    #[tokio::test]
    async fn deploys_extract_addresses_from_events() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.release.polkavm");
        let b = tmp.path().join("b.release.polkavm");
        std::fs::write(&a, b"artifact a").unwrap();
        std::fs::write(&b, b"artifact b").unwrap();

        let chain = Arc::new(SandboxChain::new());
        let deployer = Deployer::new(chain.clone(), Signer::dev("Alice"));

        let single = deployer.deploy(&a).await.unwrap();
        let batch = deployer.deploy_batch(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(batch.addresses.len(), 2);
        // every instantiation gets a fresh address
        assert_ne!(batch.addresses[0], batch.addresses[1]);
        assert_ne!(batch.addresses[0], single.address);
        assert_eq!(chain.deployed_count(), 3);
    }

    #[tokio::test]
    async fn rejected_submission_surfaces_reason() {
        let chain = Arc::new(SandboxChain::new());
        chain.fail_next_submit("pool is full");
        let err = chain
            .submit(&Signer::dev("Alice"), Call::StoreMetadata { payload: vec![1] })
            .await
            .unwrap_err();
        match err {
            ChainError::Rejected { reason } => assert_eq!(reason, "pool is full"),
            other => panic!("expected Rejected, got {other}"),
        }
        // rejection consumed; next submission goes through
        chain
            .submit(&Signer::dev("Alice"), Call::StoreMetadata { payload: vec![1] })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn state_survives_a_reload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state_file = tmp.path().join("sandbox.json");
        let alice = Signer::dev("Alice");

        let registry_addr = {
            let chain = Arc::new(SandboxChain::with_state_file(&state_file).unwrap());
            let registry_addr = deploy_registry(&chain, &alice).await;
            let registry = Registry::new(chain.clone(), registry_addr, alice.clone());
            registry.publish(&entry("@example/counter", 1)).await.unwrap();
            registry_addr
        };

        let chain = Arc::new(SandboxChain::with_state_file(&state_file).unwrap());
        let registry = Registry::new(chain.clone(), registry_addr, alice);
        assert_eq!(registry.version_count("@example/counter").await.unwrap(), 1);
        assert_eq!(registry.contract_names().await.unwrap(), vec!["@example/counter"]);
    }
}
