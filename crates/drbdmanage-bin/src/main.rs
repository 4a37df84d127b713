//! `drbdmanaged`: the cluster daemon entry point.
//!
//! Loads configuration, opens the replicated control volume, and runs a
//! cooperative single-threaded event loop over three readiness sources:
//! the `drbdsetup events2 all` pipe, the process signal mask, and a
//! scheduled-tick timeout that drains any reconcile request a mutator
//! queued since the last pass. An RPC/IPC transport would register a
//! fourth source here (its own token, following the same registration
//! pattern as the events pipe) but is out of scope for this core.

mod event_loop;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use drbdmanage_config::DrbdmanageConfig;
use drbdmanage_reconcile::NullNotifier;
use drbdmanage_server::{BalancedDeployer, ServerFacade};
use drbdmanage_storage::StorageRegistry;

#[derive(Parser)]
#[command(name = "drbdmanaged")]
#[command(author, version, about = "DRBD9 cluster configuration daemon")]
struct Cli {
    /// This cluster member's node name.
    node_name: String,

    /// Path to the daemon's config file. Defaults to the built-in search
    /// path (see `drbdmanage-config`) when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the replicated control volume's block device or backing
    /// file. Defaults to a path conventional for the configured
    /// `drbdctrl-vg`.
    #[arg(long)]
    control_volume: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DrbdmanageConfig::load_from_file(path.clone()),
        None => DrbdmanageConfig::load(),
    }
    .context("failed to load daemon configuration")?;

    let control_volume = cli.control_volume.clone().unwrap_or_else(|| {
        PathBuf::from(format!("/dev/{}/.drbdctrl_0", config.drbdctrl_vg))
    });

    let storage = StorageRegistry::new()
        .resolve(&config.storage_plugin)
        .with_context(|| {
            format!(
                "no storage backend registered for plugin '{}' (concrete backends are not part of this core)",
                config.storage_plugin
            )
        })?;

    let drbdadm_path = config.drbdadm_path.clone();

    let mut facade = ServerFacade::new(
        control_volume,
        storage,
        NullNotifier,
        config,
        Box::new(BalancedDeployer),
        cli.node_name,
    )
    .context("failed to open control volume")?;

    facade.run_initial_up();
    facade.reconcile_control_volume();

    event_loop::run(facade, drbdadm_path)
}
