//! Upload/download through storage nodes and the indexer.

use zgs_testnet::{NetworkParams, Scenario, TestNetwork, check, check_eq};

use crate::helpers::{download_when_synced, random_file, run_passing};

/// Upload a file straight to storage node 0 and read it back from node 0.
struct NodeRoundtrip;

impl Scenario for NodeRoundtrip {
    fn name(&self) -> &str {
        "node-roundtrip"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 1)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let (path, data) = random_file(network, "small", 256 * 1024).await?;
        let tx = network.tx_params()?;
        let route = network.node_route(0)?;

        let root = network.cli().upload(&tx, &route, &path).await?;
        check!(root.starts_with("0x") && root.len() == 66, "bad root {root}");

        let downloaded = download_when_synced(network, &route, &root).await?;
        check_eq!(downloaded.len(), data.len());
        check!(downloaded == data, "downloaded content differs");
        Ok(())
    }
}

#[tokio::test]
async fn test_upload_download_via_node() -> color_eyre::Result<()> {
    run_passing(31000, &NodeRoundtrip).await
}

/// Upload through the indexer to two storage nodes, then read it back from
/// each node directly.
struct IndexerRoundtrip;

impl Scenario for IndexerRoundtrip {
    fn name(&self) -> &str {
        "indexer-roundtrip"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 2).with_indexer(true)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let (path, data) = random_file(network, "via_indexer", 10 * 1024).await?;
        let tx = network.tx_params()?;
        let root = network
            .cli()
            .upload(&tx, &network.indexer_route()?, &path)
            .await?;

        for index in 0..2 {
            let route = network.node_route(index)?;
            let downloaded = download_when_synced(network, &route, &root).await?;
            check!(downloaded == data, "node {index} returned different content");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_upload_via_indexer_reaches_every_node() -> color_eyre::Result<()> {
    run_passing(31100, &IndexerRoundtrip).await
}

/// A storage node that is stopped, wiped and restarted resyncs earlier
/// uploads from the chain and its peers.
struct RestartResync;

impl Scenario for RestartResync {
    fn name(&self) -> &str {
        "restart-resync"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 2)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let (path, data) = random_file(network, "before_restart", 4096).await?;
        let tx = network.tx_params()?;
        let root = network
            .cli()
            .upload(&tx, &network.node_route(0)?, &path)
            .await?;
        download_when_synced(network, &network.node_route(1)?, &root).await?;

        network.stop_storage_node(1, true)?;
        network.start_storage_node(1)?;

        let downloaded = download_when_synced(network, &network.node_route(1)?, &root).await?;
        check!(downloaded == data, "restarted node returned different content");
        Ok(())
    }
}

#[tokio::test]
async fn test_storage_node_resyncs_after_clean_restart() -> color_eyre::Result<()> {
    run_passing(31200, &RestartResync).await
}
