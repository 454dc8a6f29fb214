//! Chain boundary for the cdm pipeline.
//!
//! The wire/RPC client that actually talks to a chain is an external
//! collaborator; this crate pins down its interface and everything the
//! pipeline builds on top of it:
//!
//! - [`client`]: the [`ChainClient`](client::ChainClient) trait - submit a
//!   call and await finalization, plus typed read-only registry queries
//! - [`signer`]: the signing boundary (dev accounts derived from labels)
//! - [`deployer`]: contract instantiation and batch deploys
//! - [`publisher`]: bulletin-side metadata storage returning content ids
//! - [`registry`]: the typed client over the on-chain contract registry
//! - [`sandbox`]: an in-process chain implementing the full registry
//!   semantics, used by tests and local development runs
//!
//! Every chain interaction is a suspension point: nothing in this crate
//! assumes a submission succeeded before its finalization was observed.

pub mod client;
pub mod deployer;
pub mod publisher;
pub mod registry;
pub mod sandbox;
pub mod signer;

pub use client::{Call, ChainClient, ChainEvent, Finalized};
pub use deployer::{BatchDeployment, Deployer, Deployment};
pub use publisher::{MetadataPublisher, Published};
pub use registry::{PublishEntry, Registry};
pub use sandbox::SandboxChain;
pub use signer::Signer;
