//! Contract units and their build descriptors.
//!
//! A [`ContractUnit`] is one buildable package discovered in the contracts
//! workspace. Units are re-detected from scratch on every pipeline run and
//! are immutable for the duration of that run; the only state that survives
//! between runs is the [`PackageDescriptor`] side file a successful build
//! leaves next to its artifact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// One buildable contract package in the workspace.
#[derive(Debug, Clone)]
pub struct ContractUnit {
    /// Crate name, unique within the workspace.
    pub name: String,

    /// Registry package id (e.g. `@example/counter`).
    ///
    /// `None` marks a deploy-only unit that is never registered; the
    /// registry contract itself is the canonical case.
    pub package: Option<String>,

    /// Names of other contract units this unit references by address,
    /// in declaration order.
    pub dependencies: Vec<String>,

    /// Directory holding the unit's sources.
    pub dir: PathBuf,

    /// The unit's own manifest.
    pub manifest_path: PathBuf,

    // Descriptive manifest fields carried into published metadata.
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub homepage: Option<String>,
    pub repository: Option<String>,
    pub readme_path: Option<PathBuf>,

    /// Descriptor from a previous successful build of this unit, if its
    /// side file exists on disk. `None` means "not yet built".
    pub descriptor: Option<PackageDescriptor>,
}

impl ContractUnit {
    /// Registry name this unit publishes under, if it publishes at all.
    pub fn registry_name(&self) -> Option<&str> {
        self.package.as_deref()
    }
}

/// Build record written to `target/<name>.release.cdm.json`.
///
/// Lets a later run detect that a unit was already built for the same
/// target with the same sources and dependency addresses, and reuse the
/// recorded deployment instead of rebuilding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Registry package id, when the unit publishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Deployment target the build was made against.
    pub target_hash: String,

    /// Hash over the unit's on-disk sources at build time.
    pub source_hash: String,

    /// Dependency addresses injected into the build, by contract name.
    pub dependency_addresses: BTreeMap<String, Address>,

    /// Content id of the produced artifact.
    pub artifact_cid: String,

    /// Address the artifact was deployed at, recorded after finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    /// Registry version the deployment was published as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl PackageDescriptor {
    /// Load a descriptor side file. Absent or unreadable files yield
    /// `None`: a stale or corrupt descriptor must only ever cause a
    /// rebuild, never a failure.
    pub fn load(path: &Path) -> Option<PackageDescriptor> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self).expect("descriptor serialization is infallible");
        fs::write(path, json)
    }
}

/// `target/<name>.release.polkavm` under the workspace root.
pub fn artifact_path(root: &Path, name: &str) -> PathBuf {
    root.join("target").join(format!("{name}.release.polkavm"))
}

/// `target/<name>.release.abi.json` under the workspace root.
pub fn abi_path(root: &Path, name: &str) -> PathBuf {
    root.join("target").join(format!("{name}.release.abi.json"))
}

/// `target/<name>.release.cdm.json` under the workspace root.
pub fn descriptor_path(root: &Path, name: &str) -> PathBuf {
    root.join("target").join(format!("{name}.release.cdm.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_side_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("counter.release.cdm.json");

        let mut deps = BTreeMap::new();
        deps.insert("counter".to_string(), Address::ZERO);
        let desc = PackageDescriptor {
            package: Some("@example/counter-writer".to_string()),
            target_hash: "d2030e673464dda4".to_string(),
            source_hash: "abc123".to_string(),
            dependency_addresses: deps,
            artifact_cid: "bafk2bzacea".to_string(),
            address: None,
            version: None,
        };
        desc.save(&path).unwrap();
        assert_eq!(PackageDescriptor::load(&path), Some(desc));
    }

    #[test]
    fn corrupt_descriptor_reads_as_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.release.cdm.json");
        fs::write(&path, b"not json").unwrap();
        assert_eq!(PackageDescriptor::load(&path), None);
    }

    #[test]
    fn artifact_naming_scheme() {
        let root = Path::new("/ws");
        assert_eq!(
            artifact_path(root, "counter"),
            Path::new("/ws/target/counter.release.polkavm")
        );
        assert_eq!(
            descriptor_path(root, "counter"),
            Path::new("/ws/target/counter.release.cdm.json")
        );
    }
}
