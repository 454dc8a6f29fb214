//! Error taxonomy for the build/deploy pipeline.
//!
//! Each failure class is a distinct type so callers can tell a workspace
//! misconfiguration from a toolchain failure from an on-chain rejection.
//! Nothing here is swallowed or defaulted: a component either succeeds or
//! returns one of these, and "name not registered" is a distinguished
//! `Option::None` on the query side, never an error and never a zero value.

use std::path::PathBuf;

use thiserror::Error;

/// Workspace or network configuration problems.
///
/// Reported before any chain interaction takes place.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("contract {unit} declares a dependency on unknown contract {dependency}")]
    UnknownDependency { unit: String, dependency: String },

    #[error("unknown chain {name:?} (valid names: {valid})")]
    UnknownChain { name: String, valid: String },

    #[error("missing required network parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid address for {context}: {reason}")]
    InvalidAddress { context: String, reason: String },

    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The dependency graph is not acyclic.
///
/// Carries the units left unresolvable once every acyclic prefix has been
/// scheduled; at least one of them sits on a cycle.
#[derive(Debug, Error)]
#[error("circular dependency involving: {}", involved.join(", "))]
pub struct CycleError {
    pub involved: Vec<String>,
}

/// External toolchain failure for one contract unit.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to launch build toolchain {toolchain:?}")]
    Spawn {
        toolchain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build failed for {crate_name} (exit code {code:?})\n{stderr}")]
    Failed {
        crate_name: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("build of {crate_name} reported success but produced no artifact at {path}")]
    MissingArtifact { crate_name: String, path: PathBuf },

    #[error("build i/o failure for {crate_name}")]
    Io {
        crate_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Transaction-level failure at the chain boundary.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Included in a block but reverted; `reason` is the on-chain message,
    /// verbatim.
    #[error("extrinsic reverted: {reason}")]
    Reverted { reason: String },

    /// Never included (pool rejection, signature, timeout).
    #[error("extrinsic rejected: {reason}")]
    Rejected { reason: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Contract instantiation failure.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to read artifact {path}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("deployment finalized without an Instantiated event")]
    MissingEvent,

    #[error("expected {expected} Instantiated events, got {got}")]
    EventCount { expected: usize, got: usize },
}

/// Metadata publication failure on the bulletin side.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("metadata store finalized without a Stored event")]
    MissingEvent,

    #[error("expected {expected} Stored events, got {got}")]
    EventCount { expected: usize, got: usize },

    #[error("cid mismatch for {name}: expected {expected}, chain reported {got}")]
    CidMismatch {
        name: String,
        expected: String,
        got: String,
    },
}

/// Registry publish failure.
///
/// A rejection is surfaced verbatim and never retried with a different
/// signer.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("publish of {name} rejected: {reason}")]
    Rejected { name: String, reason: String },

    /// The whole batch failed; no constituent version was appended.
    #[error("batch publish failed: {reason}")]
    BatchFailed { reason: String },

    #[error(transparent)]
    Chain(#[from] ChainError),
}
