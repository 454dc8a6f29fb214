//! On-disk layout for built and deployed contract records.
//!
//! Every record lives under `<root>/<target_hash>/contracts/<name>/<version>/`
//! with three files:
//!
//! - `abi.json` - the contract ABI as published
//! - `metadata.json` - the full metadata document
//! - `info.json` - the deployment record ([`ContractInfoRecord`])
//!
//! Next to the version directories sits a `latest` pointer file holding
//! the newest version number. The pointer is replaced by writing a temp
//! file and renaming it over the old one, so a concurrent reader observes
//! either the previous or the new version, never a torn value.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cdm_types::metadata::{AbiEntry, Metadata};
use cdm_types::Address;

/// The deployment record stored in `info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfoRecord {
    pub name: String,
    pub target_hash: String,
    pub version: u32,
    pub address: Address,
    pub metadata_cid: String,
}

/// Everything needed to persist one published contract version.
#[derive(Debug, Clone)]
pub struct SaveContract {
    pub target_hash: String,
    pub name: String,
    pub version: u32,
    pub abi: Vec<AbiEntry>,
    pub metadata: Metadata,
    pub address: Address,
    pub metadata_cid: String,
}

/// The local contract store, rooted at `~/.cdm` by default.
#[derive(Debug, Clone)]
pub struct ContractStore {
    root: PathBuf,
}

impl ContractStore {
    /// Open the default store under the user's home directory.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(Self { root: home.join(".cdm") })
    }

    /// Open a store rooted at an explicit directory.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one (target, name, version) record.
    pub fn contract_dir(&self, target_hash: &str, name: &str, version: u32) -> PathBuf {
        self.root
            .join(target_hash)
            .join("contracts")
            .join(name)
            .join(version.to_string())
    }

    /// Persist a record and flip the `latest` pointer to it.
    pub fn save_contract(&self, save: &SaveContract) -> Result<PathBuf> {
        let dir = self.contract_dir(&save.target_hash, &save.name, save.version);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let abi = serde_json::to_vec_pretty(&save.abi)?;
        fs::write(dir.join("abi.json"), abi)?;

        let metadata = serde_json::to_vec_pretty(&save.metadata)?;
        fs::write(dir.join("metadata.json"), metadata)?;

        let info = ContractInfoRecord {
            name: save.name.clone(),
            target_hash: save.target_hash.clone(),
            version: save.version,
            address: save.address,
            metadata_cid: save.metadata_cid.clone(),
        };
        fs::write(dir.join("info.json"), serde_json::to_vec_pretty(&info)?)?;

        // the pointer flip is the commit point for "latest"
        let pointer = dir
            .parent()
            .expect("version dir always has a parent")
            .join("latest");
        atomic_write(&pointer, save.version.to_string().as_bytes())?;

        debug!(name = %save.name, version = save.version, dir = %dir.display(), "saved contract record");
        Ok(dir)
    }

    /// Version the `latest` pointer currently resolves to, or `None` if
    /// nothing was saved for this name.
    pub fn latest_version(&self, target_hash: &str, name: &str) -> Result<Option<u32>> {
        let pointer = self
            .root
            .join(target_hash)
            .join("contracts")
            .join(name)
            .join("latest");
        let text = match fs::read_to_string(&pointer) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow!(e).context(format!("failed to read {}", pointer.display())))
            }
        };
        let version = text
            .trim()
            .parse::<u32>()
            .with_context(|| format!("corrupt latest pointer at {}", pointer.display()))?;
        Ok(Some(version))
    }

    /// Load the deployment record for a saved version.
    pub fn read_info(&self, target_hash: &str, name: &str, version: u32) -> Result<ContractInfoRecord> {
        let path = self.contract_dir(target_hash, name, version).join("info.json");
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write a file atomically (write to a temp sibling, then rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|s| s.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!("failed to rename {} to {}", tmp_path.display(), path.display())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Metadata {
        Metadata {
            publish_block: 0,
            published_at: "2026-01-01T00:00:00Z".to_string(),
            description: "shared counter".to_string(),
            readme: String::new(),
            authors: vec![],
            homepage: String::new(),
            repository: String::new(),
            abi: vec![],
        }
    }

    fn sample_save(version: u32) -> SaveContract {
        SaveContract {
            target_hash: "d2030e673464dda4".to_string(),
            name: "@example/counter".to_string(),
            version,
            abi: vec![],
            metadata: sample_metadata(),
            address: Address::parse("0x2c6fc00458f198f46ef072e1516b83cd56db7cf5").unwrap(),
            metadata_cid: "bafk2bzacea".to_string(),
        }
    }

    #[test]
    fn save_and_read_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContractStore::with_root(tmp.path());

        let dir = store.save_contract(&sample_save(1)).unwrap();
        assert!(dir.join("abi.json").exists());
        assert!(dir.join("metadata.json").exists());

        let info = store
            .read_info("d2030e673464dda4", "@example/counter", 1)
            .unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(
            info.address.to_string(),
            "0x2c6fc00458f198f46ef072e1516b83cd56db7cf5"
        );
    }

    #[test]
    fn latest_pointer_follows_saves() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContractStore::with_root(tmp.path());

        assert_eq!(
            store.latest_version("d2030e673464dda4", "@example/counter").unwrap(),
            None
        );
        store.save_contract(&sample_save(1)).unwrap();
        assert_eq!(
            store.latest_version("d2030e673464dda4", "@example/counter").unwrap(),
            Some(1)
        );
        store.save_contract(&sample_save(2)).unwrap();
        assert_eq!(
            store.latest_version("d2030e673464dda4", "@example/counter").unwrap(),
            Some(2)
        );
        // both version directories remain addressable
        assert!(store.contract_dir("d2030e673464dda4", "@example/counter", 1).exists());
        assert!(store.contract_dir("d2030e673464dda4", "@example/counter", 2).exists());
    }

    #[test]
    fn pointer_update_leaves_no_temp_residue() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContractStore::with_root(tmp.path());
        store.save_contract(&sample_save(1)).unwrap();
        store.save_contract(&sample_save(2)).unwrap();

        let name_dir = tmp
            .path()
            .join("d2030e673464dda4")
            .join("contracts")
            .join("@example/counter");
        let entries: Vec<String> = fs::read_dir(&name_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(entries.iter().all(|e| !e.ends_with(".tmp")), "{entries:?}");
    }

    #[test]
    fn atomic_write_replaces_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("latest");
        atomic_write(&path, b"1").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
        atomic_write(&path, b"2").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2");
    }
}
