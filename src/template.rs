//! Workspace scaffolding.
//!
//! `cdm template` writes the shared-counter example workspace: a counter
//! contract, two contracts depending on its deployed address, and the
//! registry contract for bootstrapping a fresh target. The scaffold is a
//! complete contracts workspace - `cdm deploy` runs on it as-is.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use cdm_types::CONTRACTS_REGISTRY_CRATE;

const WORKSPACE_MANIFEST: &str = r#"[workspace]
resolver = "2"
members = [
    "contracts/contract-registry",
    "contracts/counter",
    "contracts/counter_reader",
    "contracts/counter_writer",
]
"#;

const REGISTRY_MANIFEST: &str = r#"[package]
name = "contract-registry"
version = "0.1.0"
edition = "2021"
description = "Versioned (name -> address) registry for contract packages"

[dependencies]
pvm-contract = "0.3"
parity-scale-codec = { version = "3", default-features = false }

# deploy-only bootstrap unit: no package id, never registered into itself
[package.metadata.cdm]
"#;

const COUNTER_MANIFEST: &str = r#"[package]
name = "counter"
version = "0.1.0"
edition = "2021"
description = "A shared counter"

[dependencies]
pvm-contract = "0.3"

[package.metadata.cdm]
package = "@example/counter"
"#;

const COUNTER_WRITER_MANIFEST: &str = r#"[package]
name = "counter_writer"
version = "0.1.0"
edition = "2021"
description = "Writes to the shared counter"

[dependencies]
pvm-contract = "0.3"

[package.metadata.cdm]
package = "@example/counter-writer"
dependencies = ["counter"]
"#;

const COUNTER_READER_MANIFEST: &str = r#"[package]
name = "counter_reader"
version = "0.1.0"
edition = "2021"
description = "Reads the shared counter"

[dependencies]
pvm-contract = "0.3"

[package.metadata.cdm]
package = "@example/counter-reader"
dependencies = ["counter"]
"#;

const REGISTRY_SRC: &str = r#"#![no_main]
#![no_std]

use alloc::string::String;
use parity_scale_codec::{Decode, Encode};
use pvm::storage::Mapping;
use pvm::{caller, Address};
use pvm_contract as pvm;

pub type Version = u32;

/// A published contract version in the registry.
#[derive(Clone, Encode, Decode)]
pub struct PublishedContract {
    pub address: Address,
    /// Content id of this version's metadata document.
    pub metadata_uri: String,
}

#[derive(Default, Clone, Encode, Decode)]
pub struct NamedContractInfo {
    /// The account that published version 1; the only one allowed to
    /// publish further versions.
    pub owner: Address,
    pub version_count: Version,
}

#[pvm::storage]
struct Storage {
    contract_name_count: u32,
    contract_name_at: Mapping<u32, String>,
    published_address: Mapping<(String, Version), Address>,
    published_metadata_uri: Mapping<(String, Version), String>,
    info: Mapping<String, NamedContractInfo>,
}

#[pvm::contract]
mod contract_registry {
    use super::*;

    #[pvm::constructor]
    pub fn new() -> Result<(), Error> {
        Ok(())
    }

    /// Append the next version of `contract_name`.
    ///
    /// Free names are claimed by the caller; owned names revert for
    /// anyone but the owner.
    #[pvm::method]
    pub fn publish_latest(contract_name: String, contract_address: Address, metadata_uri: String) {
        let caller = caller();

        let mut info = match Storage::info().get(&contract_name) {
            Some(info) => info,
            None => {
                let count = Storage::contract_name_count().get().unwrap_or(0);
                Storage::contract_name_at().insert(&count, &contract_name);
                Storage::contract_name_count().set(&(count + 1));
                NamedContractInfo {
                    owner: caller,
                    version_count: 0,
                }
            }
        };

        if info.owner != caller {
            pvm::revert("publish_latest: caller is not the owner");
        }

        info.version_count = info
            .version_count
            .checked_add(1)
            .expect("publish_latest: version_count overflow");
        Storage::info().insert(&contract_name, &info);

        let version_idx = info.version_count - 1;
        Storage::published_address().insert(&(contract_name.clone(), version_idx), &contract_address);
        Storage::published_metadata_uri().insert(&(contract_name, version_idx), &metadata_uri);
    }

    /// Latest published address for `contract_name`, or the zero address
    /// if the name is unregistered.
    #[pvm::method]
    pub fn get_address(contract_name: String) -> Address {
        match Storage::info().get(&contract_name) {
            Some(info) => Storage::published_address()
                .get(&(contract_name, info.version_count - 1))
                .unwrap_or_default(),
            None => Address::default(),
        }
    }

    #[pvm::method]
    pub fn get_metadata_uri(contract_name: String) -> String {
        match Storage::info().get(&contract_name) {
            Some(info) => Storage::published_metadata_uri()
                .get(&(contract_name, info.version_count - 1))
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    #[pvm::method]
    pub fn get_contract_name_at(index: u32) -> String {
        Storage::contract_name_at().get(&index).unwrap_or_default()
    }

    #[pvm::method]
    pub fn get_owner(contract_name: String) -> Address {
        Storage::info()
            .get(&contract_name)
            .map(|i| i.owner)
            .unwrap_or_default()
    }

    #[pvm::method]
    pub fn get_version_count(contract_name: String) -> u32 {
        Storage::info()
            .get(&contract_name)
            .map(|i| i.version_count)
            .unwrap_or(0)
    }

    #[pvm::method]
    pub fn get_contract_count() -> u32 {
        Storage::contract_name_count().get().unwrap_or(0)
    }
}
"#;

const COUNTER_SRC: &str = r#"#![no_main]
#![no_std]

use pvm::storage::Lazy;
use pvm_contract as pvm;

#[pvm::storage]
struct Storage {
    count: u32,
}

#[pvm::contract]
mod counter {
    use super::*;

    #[pvm::constructor]
    pub fn new() -> Result<(), Error> {
        Storage::count().set(&0);
        Ok(())
    }

    #[pvm::method]
    pub fn increment() {
        let current = Storage::count().get().unwrap_or(0);
        Storage::count().set(&(current + 1));
    }

    #[pvm::method]
    pub fn get_count() -> u32 {
        Storage::count().get().unwrap_or(0)
    }
}
"#;

const COUNTER_WRITER_SRC: &str = r#"#![no_main]
#![no_std]

use pvm_contract as pvm;

// address injected at build time from the deployed `counter` contract
pvm::use_dependency!(counter);

#[pvm::contract]
mod counter_writer {
    use super::*;

    #[pvm::constructor]
    pub fn new() -> Result<(), Error> {
        Ok(())
    }

    /// Increment the shared counter through its registered address.
    #[pvm::method]
    pub fn write_increment() {
        let counter = counter::reference();
        counter.increment().expect("increment failed");
    }

    /// Increment the shared counter N times.
    #[pvm::method]
    pub fn write_increment_n(n: u32) {
        let counter = counter::reference();
        for _ in 0..n {
            counter.increment().expect("increment failed");
        }
    }
}
"#;

const COUNTER_READER_SRC: &str = r#"#![no_main]
#![no_std]

use pvm_contract as pvm;

// address injected at build time from the deployed `counter` contract
pvm::use_dependency!(counter);

#[pvm::contract]
mod counter_reader {
    use super::*;

    #[pvm::constructor]
    pub fn new() -> Result<(), Error> {
        Ok(())
    }

    /// Read the current count from the shared counter.
    #[pvm::method]
    pub fn read_count() -> u32 {
        let counter = counter::reference();
        counter.get_count().expect("get_count failed")
    }
}
"#;

/// Write the shared-counter workspace into `dir`.
///
/// Refuses to scaffold over an existing contracts workspace.
pub fn scaffold_shared_counter(dir: &Path) -> Result<Vec<PathBuf>> {
    if dir.join("Cargo.toml").exists() {
        bail!("{} already contains a Cargo.toml", dir.display());
    }

    let contracts: &[(&str, &str, &str)] = &[
        (CONTRACTS_REGISTRY_CRATE, REGISTRY_MANIFEST, REGISTRY_SRC),
        ("counter", COUNTER_MANIFEST, COUNTER_SRC),
        ("counter_reader", COUNTER_READER_MANIFEST, COUNTER_READER_SRC),
        ("counter_writer", COUNTER_WRITER_MANIFEST, COUNTER_WRITER_SRC),
    ];

    let mut written = Vec::new();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let root_manifest = dir.join("Cargo.toml");
    fs::write(&root_manifest, WORKSPACE_MANIFEST)?;
    written.push(root_manifest);

    for (name, manifest, source) in contracts {
        let contract_dir = dir.join("contracts").join(name);
        fs::create_dir_all(contract_dir.join("src"))?;
        let manifest_path = contract_dir.join("Cargo.toml");
        fs::write(&manifest_path, manifest)?;
        let source_path = contract_dir.join("src").join("lib.rs");
        fs::write(&source_path, source)?;
        written.push(manifest_path);
        written.push(source_path);
    }

    info!(dir = %dir.display(), files = written.len(), "scaffolded shared-counter workspace");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdm_resolver::{build_dependency_graph, detect_contracts, toposort_layers};

    #[test]
    fn scaffold_is_a_valid_contracts_workspace() {
        let tmp = tempfile::TempDir::new().unwrap();
        scaffold_shared_counter(tmp.path()).unwrap();

        let units = detect_contracts(tmp.path()).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            vec![CONTRACTS_REGISTRY_CRATE, "counter", "counter_reader", "counter_writer"]
        );

        // registry is deploy-only; the counters publish
        assert!(units[0].package.is_none());
        assert_eq!(units[1].package.as_deref(), Some("@example/counter"));

        let layers = toposort_layers(&build_dependency_graph(&units)).unwrap();
        assert_eq!(layers[0], vec![CONTRACTS_REGISTRY_CRATE, "counter"]);
        assert_eq!(layers[1], vec!["counter_reader", "counter_writer"]);
    }

    #[test]
    fn scaffold_refuses_to_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Cargo.toml"), "[workspace]\n").unwrap();
        assert!(scaffold_shared_counter(tmp.path()).is_err());
    }
}
