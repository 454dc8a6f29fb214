//! Project-level `cdm.json`.
//!
//! The file lives at a project root and records, per deployment target
//! (keyed by target hash), the endpoints and registry binding plus the
//! dependency versions pinned for that target:
//!
//! ```json
//! {
//!   "targets": {
//!     "d2030e673464dda4": {
//!       "asset-hub": "ws://127.0.0.1:10020",
//!       "bulletin": "http://127.0.0.1:8283/ipfs",
//!       "registry": "0x2c6fc00458f198f46ef072e1516b83cd56db7cf5"
//!     }
//!   },
//!   "dependencies": {
//!     "d2030e673464dda4": { "@example/counter": 1, "@example/math": "latest" }
//!   }
//! }
//! ```
//!
//! Lookup searches upward from the working directory, so commands work
//! from anywhere inside a project.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cdm_types::{Address, NetworkTarget};

pub const CDM_JSON: &str = "cdm.json";

/// A requested or pinned package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionReq {
    Pinned(u32),
    /// The literal string `"latest"`.
    Latest(String),
}

impl VersionReq {
    pub fn latest() -> Self {
        VersionReq::Latest("latest".to_string())
    }

    pub fn pinned(&self) -> Option<u32> {
        match self {
            VersionReq::Pinned(v) => Some(*v),
            VersionReq::Latest(_) => None,
        }
    }
}

/// One deployment target entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(rename = "asset-hub")]
    pub asset_hub: String,
    pub bulletin: String,
    pub registry: String,
}

impl TargetConfig {
    pub fn from_network_target(target: &NetworkTarget) -> Self {
        Self {
            asset_hub: target.assethub_url.clone(),
            bulletin: target.ipfs_gateway_url.clone(),
            registry: target
                .registry_address
                .map(|a| a.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn to_network_target(&self) -> Result<NetworkTarget> {
        let registry_address = if self.registry.is_empty() {
            None
        } else {
            Some(Address::parse(&self.registry).context("invalid registry address in cdm.json")?)
        };
        Ok(NetworkTarget {
            assethub_url: self.asset_hub.clone(),
            ipfs_gateway_url: self.bulletin.clone(),
            registry_address,
        })
    }
}

/// The whole `cdm.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdmConfig {
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, BTreeMap<String, VersionReq>>,
}

impl CdmConfig {
    /// Record a target entry under its hash.
    pub fn set_target(&mut self, target_hash: &str, target: &NetworkTarget) {
        self.targets
            .insert(target_hash.to_string(), TargetConfig::from_network_target(target));
    }

    /// Pin a dependency version for a target.
    pub fn pin_dependency(&mut self, target_hash: &str, package: &str, version: VersionReq) {
        self.dependencies
            .entry(target_hash.to_string())
            .or_default()
            .insert(package.to_string(), version);
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CDM_JSON);
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Find the nearest `cdm.json` at or above `start`.
pub fn find_cdm_json(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CDM_JSON);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load the nearest `cdm.json`, if any.
pub fn read_cdm_config(start: &Path) -> Result<Option<(CdmConfig, PathBuf)>> {
    let Some(path) = find_cdm_json(start) else {
        return Ok(None);
    };
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let config =
        serde_json::from_str(&text).with_context(|| format!("invalid {}", path.display()))?;
    Ok(Some((config, path)))
}
