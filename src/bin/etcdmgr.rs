//! Membership controller simulator

use clap::{Parser, Subcommand};
use etcdmgr::common::{duration_millis, parse_duration, StorePaths};
use etcdmgr::controller::{
    read_cluster_view, ClusterEvent, ClusterEventKind, Controller, EventContext, EventReport,
    Inventory,
};
use etcdmgr::store::{ClusterMember, MemoryStore};
use etcdmgr::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "etcdmgr")]
#[command(about = "etcd membership controller")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario against an in-memory store
    Simulate {
        /// Scenario file (JSON)
        #[arg(long)]
        scenario: PathBuf,

        /// Override the deployment timeout (e.g. "500ms", "30s")
        #[arg(long)]
        deploy_timeout: Option<String>,
    },
    /// Print the effective configuration
    ShowConfig,
}

/// Scenario file layout
#[derive(Debug, Deserialize)]
struct Scenario {
    inventory: Inventory,
    /// Node IDs that are live members at the start
    #[serde(default)]
    members: Vec<String>,
    /// Status each node's agent reports when deployed
    #[serde(default)]
    notifications: HashMap<String, String>,
    events: Vec<ClusterEventKind>,
}

#[derive(Debug, Serialize)]
struct Outcome {
    desired: BTreeMap<String, String>,
    members: Vec<ClusterMember>,
    reports: Vec<EventReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ControllerConfig::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Simulate {
            scenario,
            deploy_timeout,
        } => {
            if let Some(timeout) = deploy_timeout {
                config.deploy_timeout_ms = duration_millis(parse_duration(&timeout)?)?;
            }
            let scenario: Scenario = serde_json::from_slice(&tokio::fs::read(&scenario).await?)?;
            let outcome = simulate(config, scenario).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn simulate(config: ControllerConfig, scenario: Scenario) -> anyhow::Result<Outcome> {
    let paths = StorePaths::new(config.root.clone());

    let members = scenario.members.iter().map(|id| {
        let address = scenario
            .inventory
            .get(id)
            .map(|n| n.ip_address.clone())
            .unwrap_or_default();
        ClusterMember::new(id.clone(), address, config.peer_port)
    });
    let store = Arc::new(MemoryStore::with_members(members));
    for (node_id, status) in &scenario.notifications {
        store.add_watch_response(paths.notify_status(node_id), status.clone());
    }

    let mut controller = Controller::new(config)?;
    let mut reports_rx = controller.subscribe_reports();
    controller.start_watch_events()?;

    let context = EventContext::new(store.clone(), scenario.inventory);
    for kind in scenario.events {
        controller.send(ClusterEvent::new(context.clone(), kind))?;
    }
    controller.wait_for_events().await?;
    controller.close().await?;

    let mut reports = Vec::new();
    while let Ok(report) = reports_rx.try_recv() {
        reports.push(report);
    }

    let view = read_cluster_view(&*store, &paths).await?;
    Ok(Outcome {
        desired: view.desired,
        members: view.live,
        reports,
    })
}
