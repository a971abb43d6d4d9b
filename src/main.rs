//! Imperator controller entry point.
//!
//! Wires the CLI/config layer (`config.rs`) to the two reconcilers
//! (`controllers::machine`, `controllers::pool`), grounded on the teacher's
//! `main.rs` watch loop, generalized to the `kube::runtime::controller::Controller`
//! API used across the newer grounding corpus (the `DiskPool` operator's
//! `main.rs`).

use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Client;
use tracing::{error, info};

use clap::Parser;

use imperator::api::machine::Machine;
use imperator::api::machine_node_pool::MachineNodePool;
use imperator::config::{Cli, Config};
use imperator::controllers::{machine, pool};
use imperator::manager::{error_policy, Context};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env_and_cli(&cli);

    if let Err(err) = run(config).await {
        error!(error = %err, "imperator exited with a fatal error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), imperator::error::Error> {
    let client = Client::try_default().await?;
    let ctx = Arc::new(Context { client: client.clone(), config });

    let machines: Api<Machine> = Api::all(client.clone());
    let pools: Api<MachineNodePool> = Api::all(client);

    info!("starting Machine and MachineNodePool controllers");

    let machine_controller = Controller::new(machines, watcher::Config::default())
        .run(machine::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Err(err) = res {
                error!(error = %err, "machine reconciliation error");
            }
        });

    let pool_controller = Controller::new(pools, watcher::Config::default())
        .run(pool::reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(err) = res {
                error!(error = %err, "machine node pool reconciliation error");
            }
        });

    tokio::join!(machine_controller, pool_controller);
    Ok(())
}
