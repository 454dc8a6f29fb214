//! cdm: build, deploy and version PolkaVM contract packages.
//!
//! ## Example usage
//!
//! ```bash
//! # Scaffold the shared-counter example workspace
//! cdm template my-contracts
//!
//! # Build everything in dependency order (no chain interaction)
//! cdm build
//!
//! # Build, deploy and register against the local sandbox chain,
//! # bootstrapping the registry on first run
//! cdm deploy --name local
//!
//! # Install a published package into ~/.cdm
//! cdm install @example/counter@1
//!
//! # Query the registry
//! cdm registry get @example/counter
//! cdm registry list
//! ```
//!
//! Live endpoints are reached through an external [`ChainClient`]
//! implementation; the bundled sandbox chain (persisted to a state file)
//! covers local development and tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cdm::config::{read_cdm_config, CdmConfig, VersionReq};
use cdm::install::{install_packages, InstallRequest};
use cdm::pipeline::{execute_pipeline, ChainServices, ContractState, PipelineOptions, PipelineReport, StatusCallback};
use cdm::template::scaffold_shared_counter;
use cdm_chain::{Registry, SandboxChain, Signer};
use cdm_store::{compute_target_hash, ContractStore};
use cdm_types::error::ConfigError;
use cdm_types::{chain_preset, Address, NetworkTarget};

#[derive(Parser)]
#[command(
    name = "cdm",
    author,
    version,
    about = "Contract dependency manager for PolkaVM chains",
    long_about = "Builds interdependent contract packages in dependency order, deploys them,\n\
                  and records every deployment as a new version in the on-chain registry."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Contracts workspace root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and build every contract in dependency order
    Build(BuildCmd),
    /// Build, deploy and register the workspace against a target
    Deploy(DeployCmd),
    /// Install published packages from the registry into the local store
    Install(InstallCmd),
    /// Scaffold the shared-counter example workspace
    Template(TemplateCmd),
    /// Query the on-chain registry
    Registry(RegistryCmd),
}

/// Where to deploy: preset, overrides, and the registry binding.
#[derive(Args)]
struct TargetArgs {
    /// Known chain preset (local, preview-net, paseo, polkadot)
    #[arg(long, short = 'n', default_value = "local")]
    name: String,

    /// Override the asset-hub endpoint
    #[arg(long)]
    assethub_url: Option<String>,

    /// Override the bulletin/IPFS gateway
    #[arg(long)]
    ipfs_gateway_url: Option<String>,

    /// Registry contract address (overrides preset and cdm.json)
    #[arg(long)]
    registry: Option<String>,
}

impl TargetArgs {
    fn resolve(&self, root: &Path) -> Result<NetworkTarget> {
        let preset = chain_preset(&self.name)?;
        let mut target = NetworkTarget::from_preset(preset)?;
        if let Some(url) = &self.assethub_url {
            target.assethub_url = url.clone();
        }
        if let Some(url) = &self.ipfs_gateway_url {
            target.ipfs_gateway_url = url.clone();
        }
        if let Some(registry) = &self.registry {
            target.registry_address = Some(Address::parse(registry)?);
        } else if target.registry_address.is_none() {
            // a previous deploy may have recorded the bootstrapped registry
            if let Some((config, _)) = read_cdm_config(root)? {
                if let Some(tc) = config
                    .targets
                    .values()
                    .find(|tc| tc.asset_hub == target.assethub_url && !tc.registry.is_empty())
                {
                    target.registry_address = Some(Address::parse(&tc.registry)?);
                }
            }
        }
        Ok(target)
    }
}

/// The in-process sandbox chain standing in for a node.
#[derive(Args)]
struct SandboxArgs {
    /// Sandbox chain state file (default: <root>/.cdm-sandbox.json)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Dev account to sign with
    #[arg(long, default_value = "//Alice")]
    suri: String,
}

impl SandboxArgs {
    fn services(&self, root: &Path) -> Result<ChainServices> {
        let path = self
            .state_file
            .clone()
            .unwrap_or_else(|| root.join(".cdm-sandbox.json"));
        let chain = SandboxChain::with_state_file(&path)?;
        Ok(ChainServices {
            client: Arc::new(chain),
            signer: Signer::from_suri(&self.suri),
        })
    }
}

#[derive(Args)]
struct BuildCmd {
    #[command(flatten)]
    target: TargetArgs,

    /// Only process these contracts
    #[arg(long = "contract")]
    contracts: Vec<String>,

    /// Toolchain program driving contract builds
    #[arg(long)]
    toolchain: Option<String>,
}

impl BuildCmd {
    async fn execute(self, root: &Path) -> Result<()> {
        let target = self.target.resolve(root)?;
        let mut opts = PipelineOptions::new(root, target);
        opts.contract_filter = self.contracts;
        opts.toolchain = self.toolchain;
        opts.on_status = Some(status_printer());

        let report = execute_pipeline(opts).await?;
        finish(&report)
    }
}

#[derive(Args)]
struct DeployCmd {
    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    sandbox: SandboxArgs,

    /// Only process these contracts
    #[arg(long = "contract")]
    contracts: Vec<String>,

    /// Toolchain program driving contract builds
    #[arg(long)]
    toolchain: Option<String>,

    /// Fail the run if it exceeds this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl DeployCmd {
    async fn execute(self, root: &Path) -> Result<()> {
        let target = self.target.resolve(root)?;
        let mut opts = PipelineOptions::new(root, target.clone());
        opts.services = Some(self.sandbox.services(root)?);
        opts.contract_filter = self.contracts;
        opts.toolchain = self.toolchain;
        opts.timeout = self.timeout_secs.map(Duration::from_secs);
        opts.on_status = Some(status_printer());

        let report = execute_pipeline(opts).await?;

        if let Some(registry) = report.registry_address {
            println!("CONTRACTS_REGISTRY_ADDR={registry}");
            // record the (possibly bootstrapped) target for later runs
            let mut config = read_cdm_config(root)?
                .map(|(config, _)| config)
                .unwrap_or_else(CdmConfig::default);
            let bound = NetworkTarget {
                registry_address: Some(registry),
                ..target
            };
            config.set_target(&report.target_hash, &bound);
            config.save(root)?;
        }
        finish(&report)
    }
}

#[derive(Args)]
struct InstallCmd {
    /// Packages to install (`@scope/name` or `@scope/name@version`)
    #[arg(required = true)]
    packages: Vec<String>,

    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    sandbox: SandboxArgs,

    /// Local store root (default: ~/.cdm)
    #[arg(long)]
    store_root: Option<PathBuf>,
}

impl InstallCmd {
    async fn execute(self, root: &Path) -> Result<()> {
        let target = self.target.resolve(root)?;
        let registry_address = target
            .registry_address
            .ok_or(ConfigError::MissingParameter("registry address"))?;
        let target_hash = compute_target_hash(&target);

        let services = self.sandbox.services(root)?;
        let registry = Registry::new(services.client.clone(), registry_address, services.signer);
        let store = match self.store_root {
            Some(store_root) => ContractStore::with_root(store_root),
            None => ContractStore::new()?,
        };

        let requests = self
            .packages
            .iter()
            .map(|spec| InstallRequest::parse(spec))
            .collect::<Result<Vec<_>>>()?;
        let outcomes =
            install_packages(&services.client, &registry, &store, &target_hash, &requests).await?;

        let mut config = read_cdm_config(root)?
            .map(|(config, _)| config)
            .unwrap_or_else(CdmConfig::default);
        config.set_target(&target_hash, &target);
        for outcome in &outcomes {
            config.pin_dependency(
                &target_hash,
                &outcome.package,
                VersionReq::Pinned(outcome.version),
            );
            println!(
                "installed {}@{} -> {} ({})",
                outcome.package,
                outcome.version,
                outcome.address,
                outcome.saved_path.display()
            );
        }
        config.save(root)?;
        Ok(())
    }
}

#[derive(Args)]
struct TemplateCmd {
    /// Directory to scaffold into
    dir: PathBuf,
}

impl TemplateCmd {
    fn execute(self) -> Result<()> {
        let files = scaffold_shared_counter(&self.dir)?;
        println!("scaffolded {} files under {}", files.len(), self.dir.display());
        println!("next: cd {} && cdm deploy", self.dir.display());
        Ok(())
    }
}

#[derive(Args)]
struct RegistryCmd {
    #[command(subcommand)]
    command: RegistryCommands,

    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    sandbox: SandboxArgs,
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// Published address for a name (latest, or a specific version)
    Get {
        name: String,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Metadata URI for a name (latest, or a specific version)
    Metadata {
        name: String,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Owner of a name
    Owner { name: String },
    /// Number of published versions for a name
    Versions { name: String },
    /// Every registered name, in registration order
    List,
}

impl RegistryCmd {
    async fn execute(self, root: &Path) -> Result<()> {
        let target = self.target.resolve(root)?;
        let registry_address = target
            .registry_address
            .ok_or(ConfigError::MissingParameter("registry address"))?;
        let services = self.sandbox.services(root)?;
        let registry = Registry::new(services.client, registry_address, services.signer);

        match self.command {
            RegistryCommands::Get { name, version } => {
                let address = match version {
                    Some(v) => registry.address_at(&name, v).await?,
                    None => registry.address(&name).await?,
                };
                match address {
                    Some(address) => println!("{address}"),
                    None => println!("{name}: not registered"),
                }
            }
            RegistryCommands::Metadata { name, version } => {
                let uri = match version {
                    Some(v) => registry.metadata_uri_at(&name, v).await?,
                    None => registry.metadata_uri(&name).await?,
                };
                match uri {
                    Some(uri) => println!("{uri}"),
                    None => println!("{name}: not registered"),
                }
            }
            RegistryCommands::Owner { name } => match registry.owner(&name).await? {
                Some(owner) => println!("{owner}"),
                None => println!("{name}: not registered"),
            },
            RegistryCommands::Versions { name } => {
                println!("{}", registry.version_count(&name).await?);
            }
            RegistryCommands::List => {
                for name in registry.contract_names().await? {
                    println!("{name}");
                }
            }
        }
        Ok(())
    }
}

fn status_printer() -> StatusCallback {
    Box::new(|status| match status.state {
        ContractState::Error => {
            let error = status.error.as_deref().unwrap_or("unknown error");
            eprintln!("[error]      {}: {error}", status.crate_name);
        }
        ContractState::Done => {
            let address = status
                .address
                .map(|a| a.to_string())
                .unwrap_or_default();
            let reused = if status.reused { " (cached)" } else { "" };
            println!("[done]       {} {address}{reused}", status.crate_name);
        }
        state => println!("[{state:<10}] {}", status.crate_name),
    })
}

fn finish(report: &PipelineReport) -> Result<()> {
    if report.success {
        Ok(())
    } else {
        let failures: Vec<&str> = report
            .statuses
            .values()
            .filter(|s| s.state == ContractState::Error)
            .map(|s| s.crate_name.as_str())
            .collect();
        bail!("{} contract(s) failed: {}", failures.len(), failures.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("workspace root {} does not exist", cli.root.display()))?;

    match cli.command {
        Commands::Build(cmd) => cmd.execute(&root).await,
        Commands::Deploy(cmd) => cmd.execute(&root).await,
        Commands::Install(cmd) => cmd.execute(&root).await,
        Commands::Template(cmd) => cmd.execute(),
        Commands::Registry(cmd) => cmd.execute(&root).await,
    }
}
