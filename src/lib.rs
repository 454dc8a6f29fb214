//! cdm - contract dependency manager
//!
//! Builds, deploys and versions interdependent PolkaVM contract packages.
//! Contracts declare dependencies on each other's on-chain addresses; a
//! central on-chain registry tracks the current and historical address of
//! every published package. This crate ties the workspace crates together
//! into the deployment pipeline and the `cdm` CLI:
//!
//! - [`pipeline`]: the dependency-ordered build/deploy/register state
//!   machine, including registry bootstrap
//! - [`install`]: registry-driven installation of published packages into
//!   the local store
//! - [`config`]: the project-level `cdm.json` (targets and pinned
//!   dependency versions)
//! - [`template`]: workspace scaffolding for the shared-counter example

pub mod config;
pub mod install;
pub mod pipeline;
pub mod template;

pub use config::{CdmConfig, TargetConfig, VersionReq};
pub use install::{install_packages, InstallOutcome, InstallRequest};
pub use pipeline::{
    execute_pipeline, ChainServices, ContractState, ContractStatus, PipelineOptions,
    PipelineReport,
};
