//! Bulletin-side metadata publication.
//!
//! Metadata documents are stored as raw payloads; the chain responds with
//! the content id it computed for each stored blob. Callers precompute the
//! id locally over the same bytes and treat any disagreement as a hard
//! failure - a mismatch means the stored document is not the one the
//! registry entry will point at.

use std::sync::Arc;

use tracing::{debug, info};

use cdm_types::error::PublishError;
use cdm_types::Metadata;

use crate::client::{Call, ChainClient, ChainEvent};
use crate::signer::Signer;

/// Receipt for stored metadata.
#[derive(Debug, Clone)]
pub struct Published {
    pub cids: Vec<String>,
    pub tx_hash: String,
    pub block_hash: String,
    pub block_number: u64,
}

/// Stores metadata documents for contract versions.
pub struct MetadataPublisher {
    client: Arc<dyn ChainClient>,
    signer: Signer,
}

impl MetadataPublisher {
    pub fn new(client: Arc<dyn ChainClient>, signer: Signer) -> Self {
        Self { client, signer }
    }

    /// Store one metadata document.
    pub async fn publish(&self, metadata: &Metadata) -> Result<Published, PublishError> {
        let payload = metadata.to_payload();
        debug!(bytes = payload.len(), "storing metadata payload");
        let finalized = self
            .client
            .submit(&self.signer, Call::StoreMetadata { payload })
            .await?;

        let cid = stored_cids(&finalized.events)
            .into_iter()
            .next()
            .ok_or(PublishError::MissingEvent)?;
        info!(%cid, tx = %finalized.tx_hash, "metadata stored");
        Ok(Published {
            cids: vec![cid],
            tx_hash: finalized.tx_hash,
            block_hash: finalized.block_hash,
            block_number: finalized.block_number,
        })
    }

    /// Store several documents in one atomic batch; ids come back in
    /// input order.
    pub async fn publish_batch(&self, metadata: &[Metadata]) -> Result<Published, PublishError> {
        if metadata.is_empty() {
            return Ok(Published {
                cids: Vec::new(),
                tx_hash: String::new(),
                block_hash: String::new(),
                block_number: 0,
            });
        }
        if metadata.len() == 1 {
            return self.publish(&metadata[0]).await;
        }

        let calls = metadata
            .iter()
            .map(|m| Call::StoreMetadata { payload: m.to_payload() })
            .collect();
        let finalized = self
            .client
            .submit(&self.signer, Call::BatchAll { calls })
            .await?;

        let cids = stored_cids(&finalized.events);
        if cids.len() != metadata.len() {
            return Err(PublishError::EventCount {
                expected: metadata.len(),
                got: cids.len(),
            });
        }
        info!(count = cids.len(), tx = %finalized.tx_hash, "metadata batch stored");
        Ok(Published {
            cids,
            tx_hash: finalized.tx_hash,
            block_hash: finalized.block_hash,
            block_number: finalized.block_number,
        })
    }
}

fn stored_cids(events: &[ChainEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ChainEvent::Stored { cid } => Some(cid.clone()),
            _ => None,
        })
        .collect()
}
