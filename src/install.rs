//! Registry-driven package installation.
//!
//! Installing a package resolves it against the on-chain registry (pinned
//! version or latest), fetches the version's metadata document from the
//! bulletin gateway, verifies the payload against its content id, and
//! saves the record into the local store where builds can pick the
//! address up. A name the registry does not know is reported as such -
//! it is never conflated with a zero address.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use cdm_chain::{ChainClient, Registry};
use cdm_store::{compute_cid, ContractStore, SaveContract};
use cdm_types::{Address, Metadata};

use crate::config::VersionReq;

/// One package to install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub package: String,
    pub version: VersionReq,
}

impl InstallRequest {
    /// Parse a CLI spec: `@example/counter` or `@example/counter@3`.
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.rsplit_once('@') {
            // a leading '@' belongs to the scope, not a version split
            Some((package, version)) if !package.is_empty() => Ok(Self {
                package: package.to_string(),
                version: VersionReq::Pinned(
                    version
                        .parse()
                        .with_context(|| format!("invalid version in {spec:?}"))?,
                ),
            }),
            _ => Ok(Self {
                package: spec.to_string(),
                version: VersionReq::latest(),
            }),
        }
    }
}

/// A successfully installed package version.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub package: String,
    pub version: u32,
    pub address: Address,
    pub metadata_cid: String,
    pub saved_path: PathBuf,
}

/// Install every requested package, failing on the first unresolvable one.
pub async fn install_packages(
    client: &Arc<dyn ChainClient>,
    registry: &Registry,
    store: &ContractStore,
    target_hash: &str,
    requests: &[InstallRequest],
) -> Result<Vec<InstallOutcome>> {
    let mut outcomes = Vec::with_capacity(requests.len());
    for request in requests {
        let outcome = install_one(client, registry, store, target_hash, request)
            .await
            .with_context(|| format!("failed to install {}", request.package))?;
        info!(
            package = %outcome.package,
            version = outcome.version,
            address = %outcome.address,
            "installed"
        );
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn install_one(
    client: &Arc<dyn ChainClient>,
    registry: &Registry,
    store: &ContractStore,
    target_hash: &str,
    request: &InstallRequest,
) -> Result<InstallOutcome> {
    let name = &request.package;

    let version = match request.version.pinned() {
        Some(version) => {
            if version == 0 {
                bail!("version 0 does not exist; versions start at 1");
            }
            version
        }
        None => {
            let count = registry.version_count(name).await?;
            if count == 0 {
                bail!("contract {name:?} is not registered");
            }
            count
        }
    };
    debug!(package = %name, version, "resolving against registry");

    let address = registry
        .address_at(name, version)
        .await?
        .ok_or_else(|| anyhow!("contract {name:?} has no version {version}"))?;
    let metadata_cid = registry
        .metadata_uri_at(name, version)
        .await?
        .ok_or_else(|| anyhow!("contract {name:?} has no metadata for version {version}"))?;

    let payload = client
        .fetch_blob(&metadata_cid)
        .await?
        .ok_or_else(|| anyhow!("metadata {metadata_cid} not available from the gateway"))?;
    // integrity: the fetched document must hash to the id the registry holds
    let actual = compute_cid(&payload);
    if actual != metadata_cid {
        bail!("metadata cid mismatch: registry has {metadata_cid}, payload hashes to {actual}");
    }
    let metadata: Metadata =
        serde_json::from_slice(&payload).context("stored metadata is not a valid document")?;

    let saved_path = store.save_contract(&SaveContract {
        target_hash: target_hash.to_string(),
        name: name.clone(),
        version,
        abi: metadata.abi.clone(),
        metadata,
        address,
        metadata_cid: metadata_cid.clone(),
    })?;

    Ok(InstallOutcome {
        package: name.clone(),
        version,
        address,
        metadata_cid,
        saved_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_latest_and_pinned_specs() {
        let latest = InstallRequest::parse("@example/counter").unwrap();
        assert_eq!(latest.package, "@example/counter");
        assert_eq!(latest.version, VersionReq::latest());

        let pinned = InstallRequest::parse("@example/counter@3").unwrap();
        assert_eq!(pinned.package, "@example/counter");
        assert_eq!(pinned.version, VersionReq::Pinned(3));

        // unscoped names still split on the version separator
        let plain = InstallRequest::parse("counter@2").unwrap();
        assert_eq!(plain.package, "counter");
        assert_eq!(plain.version, VersionReq::Pinned(2));
    }

    #[test]
    fn parse_rejects_garbage_versions() {
        assert!(InstallRequest::parse("counter@notanumber").is_err());
    }
}
