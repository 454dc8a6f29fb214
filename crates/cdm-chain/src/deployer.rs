//! Contract instantiation.
//!
//! Deploys read a compiled artifact from disk, submit an instantiate call
//! and wait for finalization; the deployed address comes out of the
//! `Instantiated` event on the receipt. There is no fire-and-forget: a
//! deployment either finalizes with an address or fails with the on-chain
//! reason, and whatever happens is known before any dependent step runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use cdm_types::error::DeployError;
use cdm_types::Address;

use crate::client::{Call, ChainClient, ChainEvent};
use crate::signer::Signer;

/// Receipt for one deployed contract.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub address: Address,
    pub tx_hash: String,
    pub block_hash: String,
}

/// Receipt for a batch deploy; addresses are in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchDeployment {
    pub addresses: Vec<Address>,
    pub tx_hash: String,
    pub block_hash: String,
}

/// Submits compiled artifacts as new contract instances.
pub struct Deployer {
    client: Arc<dyn ChainClient>,
    signer: Signer,
}

impl Deployer {
    pub fn new(client: Arc<dyn ChainClient>, signer: Signer) -> Self {
        Self { client, signer }
    }

    /// Deploy one artifact and return its on-chain address.
    pub async fn deploy(&self, artifact: &Path) -> Result<Deployment, DeployError> {
        let code = read_artifact(artifact)?;
        debug!(artifact = %artifact.display(), bytes = code.len(), "submitting instantiate");

        let finalized = self
            .client
            .submit(&self.signer, Call::Instantiate { code })
            .await?;

        let address = finalized
            .events
            .iter()
            .find_map(|e| match e {
                ChainEvent::Instantiated { contract } => Some(*contract),
                _ => None,
            })
            .ok_or(DeployError::MissingEvent)?;

        info!(%address, tx = %finalized.tx_hash, "contract deployed");
        Ok(Deployment {
            address,
            tx_hash: finalized.tx_hash,
            block_hash: finalized.block_hash,
        })
    }

    /// Deploy several artifacts in one atomic batch.
    ///
    /// Returns addresses in input order; a mismatch between submitted
    /// artifacts and `Instantiated` events fails the whole call.
    pub async fn deploy_batch(&self, artifacts: &[PathBuf]) -> Result<BatchDeployment, DeployError> {
        if artifacts.is_empty() {
            return Ok(BatchDeployment::default());
        }
        if artifacts.len() == 1 {
            let single = self.deploy(&artifacts[0]).await?;
            return Ok(BatchDeployment {
                addresses: vec![single.address],
                tx_hash: single.tx_hash,
                block_hash: single.block_hash,
            });
        }

        let calls = artifacts
            .iter()
            .map(|path| Ok(Call::Instantiate { code: read_artifact(path)? }))
            .collect::<Result<Vec<_>, DeployError>>()?;

        let finalized = self
            .client
            .submit(&self.signer, Call::BatchAll { calls })
            .await?;

        let addresses: Vec<Address> = finalized
            .events
            .iter()
            .filter_map(|e| match e {
                ChainEvent::Instantiated { contract } => Some(*contract),
                _ => None,
            })
            .collect();
        if addresses.len() != artifacts.len() {
            return Err(DeployError::EventCount {
                expected: artifacts.len(),
                got: addresses.len(),
            });
        }

        info!(count = addresses.len(), tx = %finalized.tx_hash, "batch deployed");
        Ok(BatchDeployment {
            addresses,
            tx_hash: finalized.tx_hash,
            block_hash: finalized.block_hash,
        })
    }
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, DeployError> {
    std::fs::read(path).map_err(|source| DeployError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}
