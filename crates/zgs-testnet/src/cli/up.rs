//! Keep a network running for manual testing.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use zgs_testnet::{NetworkParams, NodeGroup as _, Scenario, TestNetwork};

use super::args::HarnessArgs;
use super::{Run, run_scenario};

/// Bring the network up and keep it running until Ctrl+C.
#[derive(Parser)]
pub struct Up {
    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Number of blockchain nodes.
    #[arg(long, default_value_t = 1)]
    pub blockchain_nodes: usize,

    /// Number of storage nodes.
    #[arg(long, default_value_t = 1)]
    pub storage_nodes: usize,

    /// Also start an indexer trusting every storage node.
    #[arg(long)]
    pub indexer: bool,

    /// Also start a kv node subscribed to these stream ids.
    #[arg(long, value_delimiter = ',')]
    pub kv_streams: Vec<String>,
}

impl Scenario for Up {
    fn name(&self) -> &str {
        "up"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(self.blockchain_nodes, self.storage_nodes).with_indexer(self.indexer)
    }

    fn interruptible(&self) -> bool {
        false
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        if !self.kv_streams.is_empty() {
            network
                .setup_kv_node(0, self.kv_streams.clone(), None)
                .await?;
        }

        print_network_info(network)?;
        info!("network is up, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C, shutting down");
        Ok(())
    }
}

impl Run for Up {
    async fn run(self) -> color_eyre::Result<ExitCode> {
        run_scenario(&self.harness, &self).await
    }
}

fn print_network_info(network: &TestNetwork) -> color_eyre::Result<()> {
    println!("\n=== Network ===");
    println!("Root dir: {}", network.root_dir().display());
    println!("Blockchain ({:?}):", network.blockchain().backend());
    for node in network.blockchain().nodes() {
        println!("  {}  RPC: {}", node.name(), node.rpc_url());
    }
    let deployment = network.deployment()?;
    println!("Contracts:");
    println!("  flow:   {}", deployment.flow.address());
    println!("  mine:   {}", deployment.mine.address());
    println!("  reward: {}", deployment.reward.address());
    println!("Storage:");
    for node in network.storage_nodes() {
        println!("  {}  RPC: {}", node.name(), node.rpc_url());
    }
    for node in network.kv_nodes() {
        println!("  {}  RPC: {}", node.name(), node.rpc_url());
    }
    if let Some(url) = network.indexer_url() {
        println!("Indexer: {url}");
    }
    println!("===============\n");
    Ok(())
}
