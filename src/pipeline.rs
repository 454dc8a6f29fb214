//! The dependency-ordered build/deploy pipeline.
//!
//! One run walks the state machine
//! `Detect -> GraphBuild -> per layer { Build -> Deploy -> Register }`:
//! units inside a layer build in parallel and deploy/publish/register as
//! atomic batches, while the step from one layer to the next is a hard
//! barrier - a dependent's injected address is only valid once its
//! dependency's deployment has finalized and its registry version is
//! appended.
//!
//! Failure handling is fail-fast per dependency chain: a failed unit takes
//! its transitive dependents down with it, independent siblings keep
//! going, and configuration or cycle errors abort before anything is
//! built. Nothing is retried; the run reports exactly which units
//! succeeded so the operator can re-invoke, and re-invocation is
//! idempotent - units whose descriptor still matches the target, sources
//! and injected addresses are skipped and their recorded address reused.
//!
//! The registry bootstrap is the special first step: with no registry
//! bound to the target yet, the `contract-registry` unit is built with the
//! zero-address sentinel injected, deployed, and never registered into
//! itself; every later build gets the real registry address.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use cdm_build::{BuildOutput, BuildProgress, Builder};
use cdm_chain::{ChainClient, Deployer, MetadataPublisher, PublishEntry, Registry, Signer};
use cdm_chain::client::ChainEvent;
use cdm_resolver::{build_dependency_graph, detect_contracts, toposort_layers};
use cdm_store::{compute_cid, compute_target_hash};
use cdm_types::error::{ConfigError, PublishError};
use cdm_types::unit::{abi_path, artifact_path, descriptor_path, ContractUnit, PackageDescriptor};
use cdm_types::{
    AbiEntry, Address, Metadata, NetworkTarget, CONTRACTS_REGISTRY_CRATE, REGISTRY_INJECT_NAME,
};

/// Lifecycle of one unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractState {
    Waiting,
    Building,
    Built,
    Deploying,
    Registering,
    Done,
    Error,
}

impl std::fmt::Display for ContractState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContractState::Waiting => "waiting",
            ContractState::Building => "building",
            ContractState::Built => "built",
            ContractState::Deploying => "deploying",
            ContractState::Registering => "registering",
            ContractState::Done => "done",
            ContractState::Error => "error",
        };
        f.pad(s)
    }
}

/// Per-unit progress snapshot, updated through the run.
#[derive(Debug, Clone)]
pub struct ContractStatus {
    pub crate_name: String,
    pub state: ContractState,
    pub error: Option<String>,
    pub address: Option<Address>,
    pub cid: Option<String>,
    pub deploy_tx_hash: Option<String>,
    pub publish_tx_hash: Option<String>,
    pub register_tx_hash: Option<String>,
    pub duration: Option<Duration>,
    pub build_progress: Option<BuildProgress>,
    /// Skipped via a matching descriptor; `address` is the reused one.
    pub reused: bool,
}

impl ContractStatus {
    fn waiting(crate_name: &str) -> Self {
        Self {
            crate_name: crate_name.to_string(),
            state: ContractState::Waiting,
            error: None,
            address: None,
            cid: None,
            deploy_tx_hash: None,
            publish_tx_hash: None,
            register_tx_hash: None,
            duration: None,
            build_progress: None,
            reused: false,
        }
    }
}

/// Observer invoked after every status change.
pub type StatusCallback = Box<dyn Fn(&ContractStatus) + Send + Sync>;

/// Chain access for deploy mode; `None` services means build-only.
pub struct ChainServices {
    pub client: Arc<dyn ChainClient>,
    pub signer: Signer,
}

pub struct PipelineOptions {
    /// Contracts workspace root.
    pub root: PathBuf,
    /// Where to deploy; the registry binding may be absent (bootstrap).
    pub target: NetworkTarget,
    /// Chain access, or `None` to stop after building.
    pub services: Option<ChainServices>,
    /// Restrict the run to these units (empty: the whole workspace).
    pub contract_filter: Vec<String>,
    /// Substitute toolchain program (tests and custom drivers).
    pub toolchain: Option<String>,
    /// Advisory wall-clock bound; on expiry the run fails as a whole
    /// rather than continuing with unconfirmed addresses.
    pub timeout: Option<Duration>,
    pub on_status: Option<StatusCallback>,
}

impl PipelineOptions {
    pub fn new(root: impl AsRef<Path>, target: NetworkTarget) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            target,
            services: None,
            contract_filter: Vec::new(),
            toolchain: None,
            timeout: None,
            on_status: None,
        }
    }
}

/// Outcome of one run.
///
/// `statuses` records every unit's terminal state, so a partial run is
/// recoverable: whatever reached `done` is deployed and registered, and
/// re-invoking picks up from there.
#[derive(Debug)]
pub struct PipelineReport {
    pub addresses: BTreeMap<String, Address>,
    pub statuses: BTreeMap<String, ContractStatus>,
    /// Registry in effect after the run (set by bootstrap if it ran).
    pub registry_address: Option<Address>,
    pub target_hash: String,
    pub success: bool,
}

/// Execute one pipeline run.
///
/// Configuration and cycle errors are returned as `Err` (nothing was
/// attempted); build/deploy/registry failures land in the report with
/// `success == false`.
pub async fn execute_pipeline(mut opts: PipelineOptions) -> Result<PipelineReport> {
    match opts.timeout.take() {
        Some(limit) => tokio::time::timeout(limit, run(opts))
            .await
            .map_err(|_| anyhow!("pipeline timed out after {limit:?}; run failed, re-invoke to resume"))?,
        None => run(opts).await,
    }
}

async fn run(opts: PipelineOptions) -> Result<PipelineReport> {
    let units = detect_contracts(&opts.root)?;
    let graph = build_dependency_graph(&units);
    let mut layers = toposort_layers(&graph)?;

    if !opts.contract_filter.is_empty() {
        let keep: HashSet<&str> = opts.contract_filter.iter().map(String::as_str).collect();
        layers = layers
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .filter(|name| keep.contains(name.as_str()))
                    .collect::<Vec<_>>()
            })
            .filter(|layer| !layer.is_empty())
            .collect();
    }

    let board = StatusBoard::new(
        layers.iter().flatten().map(String::as_str),
        opts.on_status,
    );
    let mut addresses: BTreeMap<String, Address> = BTreeMap::new();
    let mut failed: HashSet<String> = HashSet::new();

    let mut builder = Builder::new(&opts.root);
    if let Some(program) = &opts.toolchain {
        builder = builder.with_program(program.clone());
    }

    let services = opts.services.as_ref();
    let deployer = services.map(|s| Deployer::new(s.client.clone(), s.signer.clone()));
    let publisher = services.map(|s| MetadataPublisher::new(s.client.clone(), s.signer.clone()));

    let mut registry_address = opts.target.registry_address;

    // Bootstrap: deploy the registry itself before anything needs it.
    if services.is_some() && registry_address.is_none() {
        let Some(registry_unit) = units.iter().find(|u| u.name == CONTRACTS_REGISTRY_CRATE) else {
            return Err(ConfigError::MissingParameter(
                "registry address (target has none and the workspace has no contract-registry unit to bootstrap)",
            )
            .into());
        };
        for layer in &mut layers {
            layer.retain(|name| name != CONTRACTS_REGISTRY_CRATE);
        }
        layers.retain(|layer| !layer.is_empty());

        info!(unit = %registry_unit.name, "bootstrapping registry");
        match bootstrap_registry(
            &opts.root,
            &opts.target,
            &builder,
            deployer.as_ref().expect("deploy mode"),
            registry_unit,
            &board,
        )
        .await
        {
            Ok(address) => {
                registry_address = Some(address);
                addresses.insert(registry_unit.name.clone(), address);
            }
            Err(e) => {
                failed.insert(registry_unit.name.clone());
                board.update(&registry_unit.name, |st| {
                    st.state = ContractState::Error;
                    st.error = Some(e.to_string());
                });
                // nothing can build without a registry address
                layers.clear();
            }
        }
    }

    let effective_target = NetworkTarget {
        registry_address,
        ..opts.target.clone()
    };
    let target_hash = compute_target_hash(&effective_target);
    let registry_client = match (services, registry_address) {
        (Some(s), Some(addr)) => Some(Registry::new(s.client.clone(), addr, s.signer.clone())),
        _ => None,
    };
    let inject_registry_default = registry_address.unwrap_or(Address::ZERO);

    for layer in &layers {
        // skip units whose dependencies already failed; the cascade is
        // transitive because layers run in topological order
        let mut runnable: Vec<&ContractUnit> = Vec::new();
        for name in layer {
            let unit = units
                .iter()
                .find(|u| &u.name == name)
                .expect("scheduled unit was detected");
            if let Some(dep) = unit.dependencies.iter().find(|d| failed.contains(*d)) {
                failed.insert(name.clone());
                board.update(name, |st| {
                    st.state = ContractState::Error;
                    st.error = Some(format!("skipped: dependency {dep} failed"));
                });
            } else {
                runnable.push(unit);
            }
        }

        // descriptor-matched units are reused, the rest build
        let mut to_build: Vec<(&ContractUnit, BTreeMap<String, Address>)> = Vec::new();
        for unit in runnable {
            let inject_registry = registry_for_unit(unit, inject_registry_default);
            let deps = resolve_dependency_addresses(unit, &addresses, &units);
            match cached_descriptor(
                unit,
                &opts.root,
                &target_hash,
                inject_registry,
                &deps,
                services.is_some(),
            ) {
                Some(desc) => {
                    debug!(unit = %unit.name, "descriptor matches, reusing previous build");
                    if let Some(address) = desc.address {
                        addresses.insert(unit.name.clone(), address);
                    }
                    board.update(&unit.name, |st| {
                        st.state = ContractState::Done;
                        st.reused = true;
                        st.address = desc.address;
                    });
                }
                None => to_build.push((unit, deps)),
            }
        }

        // build phase: parallel within the layer
        for (unit, _) in &to_build {
            board.update(&unit.name, |st| st.state = ContractState::Building);
        }
        let board_ref = &board;
        let builder_ref = &builder;
        let target_hash_ref = target_hash.as_str();
        let results = join_all(to_build.iter().map(|(unit, deps)| async move {
            let result = builder_ref
                .build_streaming(
                    unit,
                    registry_for_unit(unit, inject_registry_default),
                    deps,
                    target_hash_ref,
                    move |progress| {
                        board_ref.update(&unit.name, |st| st.build_progress = Some(progress.clone()));
                    },
                )
                .await;
            (*unit, result)
        }))
        .await;

        let mut built: Vec<(&ContractUnit, BuildOutput)> = Vec::new();
        for (unit, result) in results {
            match result {
                Ok(output) => {
                    board.update(&unit.name, |st| {
                        st.state = ContractState::Built;
                        st.duration = Some(output.duration);
                        st.build_progress = None;
                    });
                    built.push((unit, output));
                }
                Err(e) => {
                    failed.insert(unit.name.clone());
                    board.update(&unit.name, |st| {
                        st.state = ContractState::Error;
                        st.error = Some(e.to_string());
                    });
                }
            }
        }

        // chain phase: deploy + publish metadata concurrently, then
        // register - cross-layer ordering hinges on finishing all of it
        match (&deployer, &publisher, &registry_client) {
            (Some(deployer), Some(publisher), Some(registry)) => {
                if built.is_empty() {
                    continue;
                }
                if let Err(e) = chain_phase(
                    &opts.root,
                    &board,
                    deployer,
                    publisher,
                    registry,
                    &built,
                    &mut addresses,
                )
                .await
                {
                    let message = e.to_string();
                    warn!(layer_size = built.len(), error = %message, "layer chain phase failed");
                    for (unit, _) in &built {
                        failed.insert(unit.name.clone());
                        board.update(&unit.name, |st| {
                            st.state = ContractState::Error;
                            st.error = Some(message.clone());
                        });
                    }
                }
            }
            _ => {
                // build-only mode
                for (unit, _) in &built {
                    board.update(&unit.name, |st| st.state = ContractState::Done);
                }
            }
        }
    }

    let success = failed.is_empty();
    info!(success, units = board.len(), "pipeline run finished");
    Ok(PipelineReport {
        addresses,
        statuses: board.into_statuses(),
        registry_address,
        target_hash,
        success,
    })
}

/// The registry contract never sees a real registry address; it is built
/// against the zero sentinel and must not be registered into itself.
fn registry_for_unit(unit: &ContractUnit, default: Address) -> Address {
    if unit.name == CONTRACTS_REGISTRY_CRATE {
        Address::ZERO
    } else {
        default
    }
}

async fn bootstrap_registry(
    root: &Path,
    target: &NetworkTarget,
    builder: &Builder,
    deployer: &Deployer,
    unit: &ContractUnit,
    board: &StatusBoard,
) -> Result<Address> {
    board.update(&unit.name, |st| st.state = ContractState::Building);
    let provisional_hash = compute_target_hash(target);
    let output = builder
        .build_streaming(unit, Address::ZERO, &BTreeMap::new(), &provisional_hash, |progress| {
            board.update(&unit.name, |st| st.build_progress = Some(progress.clone()));
        })
        .await?;
    board.update(&unit.name, |st| {
        st.state = ContractState::Deploying;
        st.duration = Some(output.duration);
        st.build_progress = None;
    });

    let deployment = deployer.deploy(&output.artifact).await?;

    // re-key the descriptor to the bootstrapped target so later runs
    // (which know the registry address) recognize this build
    let bootstrapped = NetworkTarget {
        registry_address: Some(deployment.address),
        ..target.clone()
    };
    let mut descriptor = output.descriptor;
    descriptor.target_hash = compute_target_hash(&bootstrapped);
    descriptor.address = Some(deployment.address);
    if let Err(e) = descriptor.save(&descriptor_path(root, &unit.name)) {
        warn!(unit = %unit.name, error = %e, "failed to update registry descriptor");
    }

    board.update(&unit.name, |st| {
        st.state = ContractState::Done;
        st.address = Some(deployment.address);
        st.deploy_tx_hash = Some(deployment.tx_hash.clone());
    });
    info!(address = %deployment.address, "registry bootstrapped");
    Ok(deployment.address)
}

/// Deploy a layer's artifacts and publish their metadata concurrently,
/// verify the chain-reported content ids, then append every registered
/// unit's version in one atomic batch.
async fn chain_phase(
    root: &Path,
    board: &StatusBoard,
    deployer: &Deployer,
    publisher: &MetadataPublisher,
    registry: &Registry,
    built: &[(&ContractUnit, BuildOutput)],
    addresses: &mut BTreeMap<String, Address>,
) -> Result<()> {
    let registered: Vec<&ContractUnit> = built
        .iter()
        .filter(|(unit, _)| unit.package.is_some())
        .map(|(unit, _)| *unit)
        .collect();

    let published_at = chrono::Utc::now().to_rfc3339();
    let metadata_list: Vec<Metadata> = registered
        .iter()
        .map(|unit| unit_metadata(root, unit, &published_at))
        .collect();
    let expected_cids: Vec<String> = metadata_list
        .iter()
        .map(|m| compute_cid(&m.to_payload()))
        .collect();
    let cid_of: BTreeMap<&str, &str> = registered
        .iter()
        .zip(&expected_cids)
        .map(|(unit, cid)| (unit.name.as_str(), cid.as_str()))
        .collect();

    for (unit, _) in built {
        let cid = cid_of.get(unit.name.as_str()).map(|c| c.to_string());
        board.update(&unit.name, |st| {
            st.state = ContractState::Deploying;
            st.cid = cid;
        });
    }

    let artifacts: Vec<PathBuf> = built.iter().map(|(_, out)| out.artifact.clone()).collect();
    let (deployed, published) = tokio::join!(
        deployer.deploy_batch(&artifacts),
        publisher.publish_batch(&metadata_list),
    );
    let deployed = deployed?;
    let published = published?;

    // a mismatch means the stored document is not the one being registered
    for (i, unit) in registered.iter().enumerate() {
        if published.cids[i] != expected_cids[i] {
            return Err(PublishError::CidMismatch {
                name: unit.name.clone(),
                expected: expected_cids[i].clone(),
                got: published.cids[i].clone(),
            }
            .into());
        }
    }

    for (i, (unit, _)) in built.iter().enumerate() {
        let address = deployed.addresses[i];
        addresses.insert(unit.name.clone(), address);
        let deploy_tx = deployed.tx_hash.clone();
        let publish_tx = (!published.tx_hash.is_empty()).then(|| published.tx_hash.clone());
        let registers = unit.package.is_some();
        board.update(&unit.name, |st| {
            st.address = Some(address);
            st.deploy_tx_hash = Some(deploy_tx);
            if registers {
                st.state = ContractState::Registering;
                st.publish_tx_hash = publish_tx;
            } else {
                st.state = ContractState::Done;
            }
        });
    }

    let entries: Vec<PublishEntry> = registered
        .iter()
        .map(|unit| PublishEntry {
            name: unit.package.clone().expect("registered units have a package id"),
            address: addresses[&unit.name],
            metadata_uri: cid_of[unit.name.as_str()].to_string(),
        })
        .collect();
    let finalized = registry.publish_batch(&entries).await?;
    let versions: BTreeMap<String, u32> = finalized
        .iter()
        .flat_map(|f| f.events.iter())
        .filter_map(|event| match event {
            ChainEvent::Published { name, version } => Some((name.clone(), *version)),
            _ => None,
        })
        .collect();

    for (unit, output) in built {
        let mut descriptor = output.descriptor.clone();
        descriptor.address = addresses.get(&unit.name).copied();
        descriptor.version = unit
            .package
            .as_ref()
            .and_then(|package| versions.get(package))
            .copied();
        if let Err(e) = descriptor.save(&descriptor_path(root, &unit.name)) {
            warn!(unit = %unit.name, error = %e, "failed to update descriptor");
        }
        if unit.package.is_some() {
            let register_tx = finalized.as_ref().map(|f| f.tx_hash.clone());
            board.update(&unit.name, |st| {
                st.state = ContractState::Done;
                st.register_tx_hash = register_tx;
            });
        }
    }
    Ok(())
}

/// Addresses to inject for a unit's declared dependencies: resolved this
/// run when possible, recorded descriptors otherwise, the zero sentinel
/// as the build-only fallback.
fn resolve_dependency_addresses(
    unit: &ContractUnit,
    addresses: &BTreeMap<String, Address>,
    units: &[ContractUnit],
) -> BTreeMap<String, Address> {
    unit.dependencies
        .iter()
        .map(|dep| {
            let address = addresses
                .get(dep)
                .copied()
                .or_else(|| {
                    units
                        .iter()
                        .find(|u| &u.name == dep)
                        .and_then(|u| u.descriptor.as_ref())
                        .and_then(|d| d.address)
                })
                .unwrap_or(Address::ZERO);
            (dep.clone(), address)
        })
        .collect()
}

/// A unit is reusable when its descriptor matches everything the build
/// would be made of: same target, same sources, same injected addresses,
/// artifact still on disk - and, in deploy mode, a recorded address.
fn cached_descriptor(
    unit: &ContractUnit,
    root: &Path,
    target_hash: &str,
    inject_registry: Address,
    deps: &BTreeMap<String, Address>,
    need_address: bool,
) -> Option<PackageDescriptor> {
    let descriptor = unit.descriptor.as_ref()?;
    if descriptor.target_hash != target_hash {
        return None;
    }
    let current = cdm_build::source_hash(&unit.dir).ok()?;
    if current != descriptor.source_hash {
        return None;
    }
    let mut expected = deps.clone();
    expected.insert(REGISTRY_INJECT_NAME.to_string(), inject_registry);
    if descriptor.dependency_addresses != expected {
        return None;
    }
    if !artifact_path(root, &unit.name).exists() {
        return None;
    }
    if need_address && descriptor.address.is_none() {
        return None;
    }
    Some(descriptor.clone())
}

fn unit_metadata(root: &Path, unit: &ContractUnit, published_at: &str) -> Metadata {
    let readme = unit
        .readme_path
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .unwrap_or_default();
    let abi: Vec<AbiEntry> = std::fs::read(abi_path(root, &unit.name))
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default();
    Metadata {
        publish_block: 0,
        published_at: published_at.to_string(),
        description: unit.description.clone().unwrap_or_default(),
        readme,
        authors: unit.authors.clone(),
        homepage: unit.homepage.clone().unwrap_or_default(),
        repository: unit.repository.clone().unwrap_or_default(),
        abi,
    }
}

struct StatusBoard {
    statuses: Mutex<BTreeMap<String, ContractStatus>>,
    on_status: Option<StatusCallback>,
}

impl StatusBoard {
    fn new<'a>(names: impl Iterator<Item = &'a str>, on_status: Option<StatusCallback>) -> Self {
        let statuses = names
            .map(|name| (name.to_string(), ContractStatus::waiting(name)))
            .collect();
        Self {
            statuses: Mutex::new(statuses),
            on_status,
        }
    }

    fn len(&self) -> usize {
        self.statuses.lock().expect("status lock").len()
    }

    fn update(&self, name: &str, mutate: impl FnOnce(&mut ContractStatus)) {
        let mut statuses = self.statuses.lock().expect("status lock");
        let status = statuses
            .entry(name.to_string())
            .or_insert_with(|| ContractStatus::waiting(name));
        mutate(status);
        if let Some(callback) = &self.on_status {
            callback(status);
        }
    }

    fn into_statuses(self) -> BTreeMap<String, ContractStatus> {
        self.statuses.into_inner().expect("status lock")
    }
}
