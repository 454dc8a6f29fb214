//! Content addressing and the local contract store.
//!
//! This crate provides:
//! - [`cid`]: self-describing content identifiers for off-chain payloads
//! - [`target`]: short deterministic hashes partitioning the store by
//!   deployment target
//! - [`store`]: the on-disk layout for built/deployed contract records,
//!   including the atomically-updated `latest` pointer

pub mod cid;
pub mod store;
pub mod target;

pub use cid::compute_cid;
pub use store::{atomic_write, ContractInfoRecord, ContractStore, SaveContract};
pub use target::compute_target_hash;
