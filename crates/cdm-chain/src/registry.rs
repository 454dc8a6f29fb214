//! Typed client over the on-chain contract registry.
//!
//! The registry keeps an append-only sequence of versions per name.
//! Versions are dense and 1-based: the first publish creates the entry
//! with the caller as owner and becomes version 1, and `latest` is always
//! `version_count`. Only the owner may append; a rejection is surfaced
//! verbatim, never silently retried with a different signer.
//!
//! Queries distinguish "never registered" from real data: an absent name
//! yields `None`, not a zero address.

use std::sync::Arc;

use tracing::{debug, info};

use cdm_types::error::{ChainError, RegistryError};
use cdm_types::Address;

use crate::client::{Call, ChainClient, Finalized};
use crate::signer::Signer;

/// One version to publish.
#[derive(Debug, Clone)]
pub struct PublishEntry {
    /// Registry name (the package id, e.g. `@example/counter`).
    pub name: String,
    /// Deployed contract address for this version.
    pub address: Address,
    /// Content id of the version's metadata document.
    pub metadata_uri: String,
}

/// Client bound to one registry deployment.
pub struct Registry {
    client: Arc<dyn ChainClient>,
    address: Address,
    signer: Signer,
}

impl Registry {
    pub fn new(client: Arc<dyn ChainClient>, address: Address, signer: Signer) -> Self {
        Self { client, address, signer }
    }

    /// Address of the registry contract this client talks to.
    pub fn contract_address(&self) -> Address {
        self.address
    }

    fn publish_call(&self, entry: &PublishEntry) -> Call {
        Call::PublishLatest {
            registry: self.address,
            name: entry.name.clone(),
            address: entry.address,
            metadata_uri: entry.metadata_uri.clone(),
        }
    }

    /// Append one version to `name`'s entry.
    ///
    /// Creates the entry with the caller as owner if the name is new;
    /// fails with [`RegistryError::Rejected`] if the caller is not the
    /// owner of an existing entry.
    pub async fn publish(&self, entry: &PublishEntry) -> Result<Finalized, RegistryError> {
        debug!(name = %entry.name, address = %entry.address, "publishing registry version");
        let finalized = self
            .client
            .submit(&self.signer, self.publish_call(entry))
            .await
            .map_err(|e| match e {
                ChainError::Reverted { reason } => RegistryError::Rejected {
                    name: entry.name.clone(),
                    reason,
                },
                other => RegistryError::Chain(other),
            })?;
        info!(name = %entry.name, tx = %finalized.tx_hash, "registry version published");
        Ok(finalized)
    }

    /// Append every entry in one atomic transaction.
    ///
    /// All versions are appended or none: if any constituent publish would
    /// fail, the whole batch fails and no version count changes. Returns
    /// `None` for an empty batch (nothing submitted).
    pub async fn publish_batch(
        &self,
        entries: &[PublishEntry],
    ) -> Result<Option<Finalized>, RegistryError> {
        if entries.is_empty() {
            return Ok(None);
        }
        if entries.len() == 1 {
            return self.publish(&entries[0]).await.map(Some);
        }

        let calls = entries.iter().map(|e| self.publish_call(e)).collect();
        let finalized = self
            .client
            .submit(&self.signer, Call::BatchAll { calls })
            .await
            .map_err(|e| match e {
                ChainError::Reverted { reason } => RegistryError::BatchFailed { reason },
                other => RegistryError::Chain(other),
            })?;
        info!(count = entries.len(), tx = %finalized.tx_hash, "registry batch published");
        Ok(Some(finalized))
    }

    /// Number of versions published under `name` (0: name not registered).
    pub async fn version_count(&self, name: &str) -> Result<u32, RegistryError> {
        Ok(self
            .client
            .registry_version_count(&self.address, name)
            .await?)
    }

    /// Latest published address for `name`.
    pub async fn address(&self, name: &str) -> Result<Option<Address>, RegistryError> {
        let count = self.version_count(name).await?;
        if count == 0 {
            return Ok(None);
        }
        self.address_at(name, count).await
    }

    /// Address published as `version` (1-based).
    pub async fn address_at(&self, name: &str, version: u32) -> Result<Option<Address>, RegistryError> {
        Ok(self
            .client
            .registry_address_at(&self.address, name, version)
            .await?)
    }

    /// Latest metadata URI for `name`.
    pub async fn metadata_uri(&self, name: &str) -> Result<Option<String>, RegistryError> {
        let count = self.version_count(name).await?;
        if count == 0 {
            return Ok(None);
        }
        self.metadata_uri_at(name, count).await
    }

    /// Metadata URI published as `version` (1-based).
    pub async fn metadata_uri_at(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Option<String>, RegistryError> {
        Ok(self
            .client
            .registry_metadata_uri_at(&self.address, name, version)
            .await?)
    }

    /// Owner of `name`'s entry.
    pub async fn owner(&self, name: &str) -> Result<Option<Address>, RegistryError> {
        Ok(self.client.registry_owner(&self.address, name).await?)
    }

    /// Number of registered names.
    pub async fn contract_count(&self) -> Result<u32, RegistryError> {
        Ok(self.client.registry_contract_count(&self.address).await?)
    }

    /// Registered name at `index`, in registration order.
    pub async fn contract_name_at(&self, index: u32) -> Result<Option<String>, RegistryError> {
        Ok(self
            .client
            .registry_contract_name_at(&self.address, index)
            .await?)
    }

    /// All registered names, in registration order.
    pub async fn contract_names(&self) -> Result<Vec<String>, RegistryError> {
        let count = self.contract_count().await?;
        let mut names = Vec::with_capacity(count as usize);
        for index in 0..count {
            if let Some(name) = self.contract_name_at(index).await? {
                names.push(name);
            }
        }
        Ok(names)
    }
}
