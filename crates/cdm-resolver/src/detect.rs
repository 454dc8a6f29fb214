//! Contract workspace detection.
//!
//! A contracts workspace is a cargo workspace whose members opt in to the
//! pipeline through a `[package.metadata.cdm]` table:
//!
//! ```toml
//! [package]
//! name = "counter-writer"
//! description = "Writes to the shared counter"
//!
//! [package.metadata.cdm]
//! package = "@example/counter-writer"
//! dependencies = ["counter"]
//! ```
//!
//! `dependencies` names other contract units whose deployed addresses this
//! unit references; `package` is the registry package id (omitted for
//! deploy-only units such as the registry contract itself). Detection is a
//! read-only scan: it parses manifests, never invokes the toolchain, and
//! tolerates a workspace with zero contracts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use cdm_types::error::{ConfigError, CycleError};
use cdm_types::unit::{descriptor_path, ContractUnit, PackageDescriptor};

use crate::graph::{build_dependency_graph, toposort, toposort_layers};

/// Flat deployment order plus the units it covers.
#[derive(Debug, Clone)]
pub struct DeploymentOrder {
    pub crate_names: Vec<String>,
    pub units: Vec<ContractUnit>,
}

/// Layered deployment order plus the units it covers.
#[derive(Debug, Clone)]
pub struct DeploymentOrderLayered {
    pub layers: Vec<Vec<String>>,
    pub units: Vec<ContractUnit>,
}

impl DeploymentOrderLayered {
    pub fn unit(&self, name: &str) -> Option<&ContractUnit> {
        self.units.iter().find(|u| u.name == name)
    }
}

/// Scan a workspace root for contract units.
///
/// Returns one [`ContractUnit`] per member manifest carrying a
/// `[package.metadata.cdm]` table, in workspace-member order. A declared
/// dependency that names no unit in the workspace is a [`ConfigError`]
/// here, before any graph is built, so misconfiguration surfaces with the
/// manifest that caused it.
pub fn detect_contracts(root: &Path) -> Result<Vec<ContractUnit>, ConfigError> {
    let manifest_path = root.join("Cargo.toml");
    if !manifest_path.exists() {
        return Ok(Vec::new());
    }

    let manifest = read_toml(&manifest_path)?;
    let mut units = Vec::new();
    for member_dir in member_dirs(root, &manifest)? {
        let member_manifest = member_dir.join("Cargo.toml");
        if !member_manifest.exists() {
            continue;
        }
        if let Some(unit) = parse_unit(&member_dir, &member_manifest)? {
            units.push(unit);
        }
    }

    // unknown dependency names are configuration errors, not graph errors
    for unit in &units {
        for dep in &unit.dependencies {
            if !units.iter().any(|u| &u.name == dep) {
                return Err(ConfigError::UnknownDependency {
                    unit: unit.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for unit in &mut units {
        unit.descriptor = PackageDescriptor::load(&descriptor_path(root, &unit.name));
    }

    debug!(count = units.len(), root = %root.display(), "detected contract units");
    Ok(units)
}

/// Detect and flatten: the full workspace in build/deploy order.
pub fn detect_deployment_order(root: &Path) -> Result<DeploymentOrder, DetectError> {
    let units = detect_contracts(root)?;
    let graph = build_dependency_graph(&units);
    let crate_names = toposort(&graph)?;
    Ok(DeploymentOrder { crate_names, units })
}

/// Detect and layer: the full workspace grouped for parallel execution.
pub fn detect_deployment_order_layered(root: &Path) -> Result<DeploymentOrderLayered, DetectError> {
    let units = detect_contracts(root)?;
    let graph = build_dependency_graph(&units);
    let layers = toposort_layers(&graph)?;
    Ok(DeploymentOrderLayered { layers, units })
}

/// Detection failures: either the workspace is misconfigured or its
/// dependency graph has a cycle.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

fn read_toml(path: &Path) -> Result<toml::Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<toml::Value>()
        .map_err(|e| ConfigError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Expand workspace members to directories, in member order. A trailing
/// `/*` glob expands to the directory's children sorted by name.
fn member_dirs(root: &Path, manifest: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
    let members = manifest
        .get("workspace")
        .and_then(|w| w.get("members"))
        .and_then(|m| m.as_array());
    let Some(members) = members else {
        return Ok(Vec::new());
    };

    let mut dirs = Vec::new();
    for member in members {
        let Some(member) = member.as_str() else {
            continue;
        };
        if let Some(prefix) = member.strip_suffix("/*") {
            let base = root.join(prefix);
            let Ok(entries) = fs::read_dir(&base) else {
                continue;
            };
            let mut children: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            children.sort();
            dirs.extend(children);
        } else {
            dirs.push(root.join(member));
        }
    }
    Ok(dirs)
}

/// Parse one member manifest into a unit, or `None` if it carries no cdm
/// metadata table.
fn parse_unit(dir: &Path, manifest_path: &Path) -> Result<Option<ContractUnit>, ConfigError> {
    let manifest = read_toml(manifest_path)?;
    let Some(package) = manifest.get("package") else {
        return Ok(None);
    };
    let Some(cdm) = package.get("metadata").and_then(|m| m.get("cdm")) else {
        return Ok(None);
    };

    let name = package
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| ConfigError::InvalidManifest {
            path: manifest_path.to_path_buf(),
            reason: "missing package.name".to_string(),
        })?
        .to_string();

    let dependencies = match cdm.get("dependencies") {
        None => Vec::new(),
        Some(deps) => deps
            .as_array()
            .ok_or_else(|| ConfigError::InvalidManifest {
                path: manifest_path.to_path_buf(),
                reason: "package.metadata.cdm.dependencies must be an array of strings".to_string(),
            })?
            .iter()
            .map(|d| {
                d.as_str().map(String::from).ok_or_else(|| {
                    ConfigError::InvalidManifest {
                        path: manifest_path.to_path_buf(),
                        reason: "package.metadata.cdm.dependencies must be an array of strings"
                            .to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let str_field = |value: &toml::Value, key: &str| {
        value.get(key).and_then(|v| v.as_str()).map(String::from)
    };
    let readme_path = str_field(package, "readme")
        .map(|r| dir.join(r))
        .or_else(|| {
            let default = dir.join("README.md");
            default.exists().then_some(default)
        });

    Ok(Some(ContractUnit {
        name,
        package: str_field(cdm, "package"),
        dependencies,
        dir: dir.to_path_buf(),
        manifest_path: manifest_path.to_path_buf(),
        description: str_field(package, "description"),
        authors: package
            .get("authors")
            .and_then(|a| a.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        homepage: str_field(package, "homepage"),
        repository: str_field(package, "repository"),
        readme_path,
        descriptor: None,
    }))
}
