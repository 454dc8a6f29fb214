//! Shared types for the cdm workspace.
//!
//! This crate provides foundational types used across multiple crates in the
//! workspace, breaking circular dependency chains:
//!
//! - [`address`]: 20-byte contract/account addresses and parsing
//! - [`unit`]: contract units discovered in a workspace, plus the
//!   package descriptor side files written next to build artifacts
//! - [`metadata`]: the published-package metadata document and ABI model
//! - [`network`]: chain presets and deployment targets
//! - [`error`]: the error taxonomy shared by the whole pipeline

pub mod address;
pub mod error;
pub mod metadata;
pub mod network;
pub mod unit;

pub use address::Address;
pub use error::{BuildError, ChainError, ConfigError, CycleError, DeployError, PublishError, RegistryError};
pub use metadata::{AbiEntry, AbiParam, Metadata};
pub use network::{chain_preset, ChainPreset, NetworkTarget, KNOWN_CHAINS};
pub use unit::{abi_path, artifact_path, descriptor_path, ContractUnit, PackageDescriptor};

/// Crate name of the registry contract itself.
///
/// The registry is the bootstrap: it is deployed first and carries no
/// `package` id of its own, so it is never registered into itself.
pub const CONTRACTS_REGISTRY_CRATE: &str = "contract-registry";

/// Name under which the registry address is injected into every build.
pub const REGISTRY_INJECT_NAME: &str = "contracts_registry";
