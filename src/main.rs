//! Nitrility deployer - deploys the marketplace contracts and links them
//!
//! Each contract creation and each linking call is held until it reaches the
//! configured confirmation depth. Confirmed addresses are written to a
//! per-network manifest that the linking step reads back.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

mod chain;
mod config;
mod contracts;
mod deployment;
mod error;
mod events;
mod linking;
mod metrics;
mod state;
mod tx;

use chain::{ChainProvider, ConfirmationWatcher, LedgerClient};
use config::Settings;
use contracts::{ArtifactCatalog, ContractResolver};
use deployment::Deployer;
use error::DeployerError;
use events::{EventSink, TracingSink};
use linking::{LinkStep, LinkingBootstrap};
use state::ManifestStore;
use tx::{GasEstimator, NonceManager, TransactionSender};

#[derive(Parser)]
#[command(name = "nitrility-deployer")]
#[command(about = "Deploy and link the Nitrility contracts", version)]
struct Cli {
    /// Configuration file, defaults to $NITRILITY_CONFIG or config/default.toml
    #[arg(short, long, env = "NITRILITY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the named contracts, in the order given
    Deploy {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Deploy every contract listed in the configuration
    DeployAll,
    /// Run the configured link steps against the recorded deployments
    Link,
    /// Print the deployments recorded for the configured network
    Status,
}

/// What a run may have left on chain, which decides the advice on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Deploy,
    Link,
    Status,
}

impl Commands {
    fn kind(&self) -> RunKind {
        match self {
            Commands::Deploy { .. } | Commands::DeployAll => RunKind::Deploy,
            Commands::Link => RunKind::Link,
            Commands::Status => RunKind::Status,
        }
    }
}

/// Everything a deploy or link run needs, wired once per process
struct Orchestrator {
    deployer: Deployer,
    bootstrap: LinkingBootstrap,
}

impl Orchestrator {
    fn new(settings: &Settings, manifest: Arc<ManifestStore>) -> Result<Self> {
        let client: Arc<dyn LedgerClient> = Arc::new(ChainProvider::new(settings.network.clone())?);
        let catalog = Arc::new(ArtifactCatalog::open(&settings.artifacts.dir)?);
        info!(
            "Loaded {} contract interfaces from {}",
            catalog.names().len(),
            settings.artifacts.dir.display()
        );

        let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
        let watcher = ConfirmationWatcher::new(
            settings.network.poll_interval(),
            settings.network.confirmation_timeout(),
            sink.clone(),
        );
        let sender = Arc::new(TransactionSender::new(
            Arc::new(NonceManager::new()),
            GasEstimator::new(&settings.deployer),
            watcher,
            settings.deployer.confirmations,
            sink.clone(),
        ));

        let deployer = Deployer::new(
            catalog.clone(),
            client.clone(),
            sender.clone(),
            manifest.clone(),
            sink.clone(),
        );
        let bootstrap = LinkingBootstrap::new(
            Arc::new(ContractResolver::new(catalog, client)),
            sender,
            manifest,
            sink,
        );

        Ok(Self {
            deployer,
            bootstrap,
        })
    }

    async fn deploy(&self, settings: &Settings, names: &[String]) -> Result<()> {
        self.deployer.announce().await?;

        for name in names {
            let args = settings
                .contract(name)
                .map(|c| c.constructor_args.clone())
                .unwrap_or_default();
            self.deployer.deploy_with_args(name, &args).await?;
        }
        Ok(())
    }

    async fn link(&self, settings: &Settings) -> Result<()> {
        if settings.links.is_empty() {
            warn!("No link steps configured");
            return Ok(());
        }

        let steps: Vec<LinkStep> = settings.links.iter().map(LinkStep::from).collect();
        self.bootstrap.link(&steps).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let kind = cli.command.kind();
    let span = info_span!("run", run_id = %Uuid::new_v4());
    let code = exit_status(kind, run(cli).instrument(span).await);
    if code != 0 {
        std::process::exit(code);
    }
}

/// Log a failed run with advice for the operator and map it to an exit status
fn exit_status(kind: RunKind, result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            match failure_hint(kind, &e) {
                Some(hint) => error!("{:#}. {}", e, hint),
                None => error!("{:#}", e),
            }
            1
        }
    }
}

fn failure_hint(kind: RunKind, err: &anyhow::Error) -> Option<&'static str> {
    let err = err.downcast_ref::<DeployerError>()?;
    match (kind, err) {
        (RunKind::Link, e) if e.is_retryable() => {
            Some("Re-running link is safe, confirmed steps are set to the same values again")
        }
        // A creation may already be broadcast; deploying again makes a second contract
        (RunKind::Deploy, DeployerError::Timeout { .. } | DeployerError::ChainConnection { .. }) => {
            Some(
                "The creation may still be mined. Check the address logged at inclusion \
                 before deploying again",
            )
        }
        _ => None,
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting Nitrility deployer v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(cli.config.as_deref())?;
    info!(
        "Loaded configuration for network {} (chain {}, {} confirmations)",
        settings.network.name, settings.network.chain_id, settings.deployer.confirmations
    );

    let manifest = Arc::new(ManifestStore::open(
        &settings.manifest.path,
        &settings.network.name,
    )?);

    let outcome = match cli.command {
        Commands::Status => {
            print_status(&manifest).await;
            Ok(())
        }
        Commands::Deploy { names } => {
            let orchestrator = Orchestrator::new(&settings, manifest)?;
            orchestrator.deploy(&settings, &names).await
        }
        Commands::DeployAll => {
            let names: Vec<String> = settings.contracts.iter().map(|c| c.name.clone()).collect();
            let orchestrator = Orchestrator::new(&settings, manifest)?;
            orchestrator.deploy(&settings, &names).await
        }
        Commands::Link => {
            let orchestrator = Orchestrator::new(&settings, manifest)?;
            orchestrator.link(&settings).await
        }
    };

    if let Some(path) = &settings.metrics.textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics to {}: {}", path.display(), e);
        }
    }

    outcome
}

async fn print_status(manifest: &ManifestStore) {
    let entries = manifest.entries().await;
    if entries.is_empty() {
        println!("No deployments recorded for {}", manifest.network());
        return;
    }

    println!("Deployments on {}:", manifest.network());
    for (name, entry) in entries {
        println!(
            "  {:<24} {:?}  block {:<10} tx {:?}  {}",
            name,
            entry.address,
            entry.block_number,
            entry.tx_hash,
            entry.deployed_at.to_rfc3339()
        );
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nitrility_deployer=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
