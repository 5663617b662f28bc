use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cumulus_core::capacity::{open_ledger, CapacityLedger, HostCapacity};
use cumulus_core::snapshot::{ClusterSnapshot, PlacementRequest};
use cumulus_core::types::DeployDestination;
use cumulus_core::{CumulusConfig, DeploymentPlanningManager, ExcludeList};

#[derive(Parser)]
#[command(name = "cumulus")]
#[command(about = "Deployment planning and capacity allocation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Plan one VM deployment against a cluster snapshot
    Plan {
        /// Cluster snapshot (TOML)
        #[arg(long)]
        topology: PathBuf,

        /// Placement request: VM profile and deployment plan (TOML)
        #[arg(long)]
        vm: PathBuf,

        /// Planner and ledger configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the placement counters after the result
        #[arg(long)]
        metrics: bool,
    },
    /// Show the capacity ledger seeded from a cluster snapshot
    Capacity {
        /// Cluster snapshot (TOML)
        #[arg(long)]
        topology: PathBuf,

        /// Planner and ledger configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// JSON printed by `cumulus plan`
#[derive(Debug, Serialize)]
struct PlacementReport {
    vm: String,
    planned_at: DateTime<Utc>,
    destination: DeployDestination,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "cumulus=info"
            .parse()
            .context("Invalid log directive")?,
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            topology,
            vm,
            config,
            metrics,
        } => {
            let config = load_config(config.as_deref())?;
            let snapshot = load_snapshot(&topology)?;
            let request = PlacementRequest::from_file(&vm)
                .with_context(|| format!("Failed to read placement request {}", vm.display()))?;
            let ledger = seeded_ledger(&config, &snapshot)?;

            let (report, manager) = plan(&config, &snapshot, &request, ledger)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if metrics {
                eprint!("{}", manager.metrics().gather_text()?);
            }
        }
        Commands::Capacity { topology, config } => {
            let config = load_config(config.as_deref())?;
            let snapshot = load_snapshot(&topology)?;
            let ledger = seeded_ledger(&config, &snapshot)?;
            let records: Vec<HostCapacity> = ledger.list_capacity()?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CumulusConfig> {
    let mut config = match path {
        Some(path) => CumulusConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => CumulusConfig::new(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn load_snapshot(path: &Path) -> anyhow::Result<ClusterSnapshot> {
    ClusterSnapshot::from_file(path)
        .with_context(|| format!("Failed to read cluster snapshot {}", path.display()))
}

fn seeded_ledger(
    config: &CumulusConfig,
    snapshot: &ClusterSnapshot,
) -> anyhow::Result<Arc<dyn CapacityLedger>> {
    let ledger = open_ledger(&config.ledger).context("Failed to open capacity ledger")?;
    snapshot.seed_ledger(ledger.as_ref(), &config.ledger.factors())?;
    Ok(ledger)
}

fn plan(
    config: &CumulusConfig,
    snapshot: &ClusterSnapshot,
    request: &PlacementRequest,
    ledger: Arc<dyn CapacityLedger>,
) -> anyhow::Result<(PlacementReport, DeploymentPlanningManager)> {
    let topology = Arc::new(snapshot.topology()?);
    let inventory = Arc::new(snapshot.inventory(&topology));
    for &group_id in &request.affinity_groups {
        inventory.join_group(request.vm.id, group_id);
    }

    let manager = DeploymentPlanningManager::from_config(
        config,
        topology,
        ledger,
        inventory.clone(),
        inventory,
    )?;

    let destination = manager.plan_required_deployment(
        &request.vm,
        &request.plan,
        &mut ExcludeList::new(),
    )?;
    tracing::info!("Planned VM '{}' at {}", request.vm.name, destination);

    let report = PlacementReport {
        vm: request.vm.name.clone(),
        planned_at: Utc::now(),
        destination,
    };
    Ok((report, manager))
}
