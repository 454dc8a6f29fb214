//! Contract detection and dependency-ordered scheduling.
//!
//! This crate turns a contracts workspace on disk into a deterministic
//! build/deploy order:
//!
//! - [`detect`]: scans the workspace manifest, collects every contract
//!   unit together with its declared dependencies, and rejects unknown
//!   dependency names before anything else runs
//! - [`graph`]: builds the dependency graph and schedules it, flat
//!   ([`graph::toposort`]) or layered ([`graph::toposort_layers`]) for
//!   parallel execution within a layer
//!
//! Ordering is reproducible: identical workspaces produce identical
//! orders across runs, with ties broken by discovery order.

pub mod detect;
pub mod graph;

pub use detect::{
    detect_contracts, detect_deployment_order, detect_deployment_order_layered, DeploymentOrder,
    DeploymentOrderLayered, DetectError,
};
pub use graph::{build_dependency_graph, toposort, toposort_layers, DependencyGraph};
