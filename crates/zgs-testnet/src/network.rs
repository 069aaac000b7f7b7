//! The wired-up network a scenario body operates on.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use tracing::{error, info, warn};

use crate::client::{Route, StorageCli, TxParams};
use crate::config::{HarnessConfig, NetworkParams};
use crate::contract::Deployment;
use crate::driver::CliDriver;
use crate::error::{HarnessError, Result};
use crate::group::{
    BlockchainNodeGroup, GroupContext, GroupNode, KvNodeGroup, NodeGroup, StorageNodeGroup,
};
use crate::indexer::{IndexerOptions, IndexerProcess};
use crate::node::ConfigMap;
use crate::ports::{PortAllocator, is_port_free};

/// Bound on waiting for ports to be released after teardown.
const PORT_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Every process of one run, plus the state shared between them.
///
/// Dropping the network tears it down.
pub struct TestNetwork {
    config: HarnessConfig,
    root_dir: PathBuf,
    ports: PortAllocator,
    blockchain: BlockchainNodeGroup,
    storage: Option<StorageNodeGroup>,
    kv: Option<KvNodeGroup>,
    indexer: Option<IndexerProcess>,
    cli: StorageCli,
    rng: StdRng,
    seed: u64,
    shut_down: bool,
}

impl TestNetwork {
    /// An empty network rooted at `root_dir`. Nothing is started yet.
    pub fn new(config: HarnessConfig, root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let seed = config.random_seed.unwrap_or_else(rand::random);
        info!(seed, "random seed");

        let cli = StorageCli::new(
            CliDriver::new(&config.cli_binary, &root_dir).with_timeout(config.cli_timeout),
            &root_dir,
        );
        Self {
            ports: PortAllocator::new(config.port_min),
            blockchain: BlockchainNodeGroup::new(config.chain_backend, &config.chain_binary),
            storage: None,
            kv: None,
            indexer: None,
            cli,
            rng: StdRng::seed_from_u64(seed),
            seed,
            shut_down: false,
            root_dir,
            config,
        }
    }

    /// Bring up the blockchain, deploy contracts, then bring up storage.
    pub async fn setup_nodes(&mut self, params: &NetworkParams) -> Result<()> {
        let mut ctx = GroupContext {
            config: &self.config,
            root_dir: &self.root_dir,
            ports: &mut self.ports,
        };

        self.blockchain
            .setup(&mut ctx, params.num_blockchain_nodes, &params.blockchain_overrides)
            .await?;
        info!("blockchain up ({} node(s))", params.num_blockchain_nodes);

        let deployment = self
            .blockchain
            .deployment()
            .cloned()
            .ok_or_else(|| HarnessError::Config("blockchain setup deployed no contracts".into()))?;
        let chain_url = self
            .blockchain
            .rpc_url()
            .ok_or_else(|| HarnessError::Config("no blockchain node".into()))?;

        let storage = self.storage.insert(StorageNodeGroup::new(
            &self.config.storage_binary,
            deployment,
            chain_url,
        ));
        storage
            .setup(&mut ctx, params.num_storage_nodes, &params.storage_overrides)
            .await?;
        info!("storage up ({} node(s))", params.num_storage_nodes);

        if params.indexer {
            let urls = self.storage_rpc_urls();
            let discover_ports = self
                .storage_nodes()
                .iter()
                .map(|n| n.spec().ports.rpc.to_string())
                .collect::<Vec<_>>()
                .join(",");
            self.setup_indexer(
                &urls.join(","),
                urls.first().map(String::as_str),
                Some(&discover_ports),
            )
            .await?;
        }
        Ok(())
    }

    /// Start kv node `index` subscribed to `stream_ids`.
    pub async fn setup_kv_node(
        &mut self,
        index: usize,
        stream_ids: Vec<String>,
        overrides: Option<&ConfigMap>,
    ) -> Result<()> {
        if self.kv.is_none() {
            let group = KvNodeGroup::new(
                &self.config.kv_binary,
                self.deployment()?.clone(),
                self.chain_rpc_url()?,
                self.storage_rpc_urls(),
            );
            self.kv = Some(group);
        }
        let mut ctx = GroupContext {
            config: &self.config,
            root_dir: &self.root_dir,
            ports: &mut self.ports,
        };
        let Some(kv) = self.kv.as_mut() else {
            return Ok(());
        };
        kv.setup_node(&mut ctx, index, stream_ids, overrides).await
    }

    /// Start the indexer and wait for its endpoint.
    pub async fn setup_indexer(
        &mut self,
        trusted: &str,
        discover_node: Option<&str>,
        discover_ports: Option<&str>,
    ) -> Result<()> {
        if self.indexer.is_some() {
            return Err(HarnessError::Config("indexer already started".into()));
        }
        let options = IndexerOptions {
            trusted: trusted.to_string(),
            discover_node: discover_node.map(str::to_string),
            discover_ports: discover_ports.map(str::to_string),
        };
        let indexer = IndexerProcess::start(
            &self.config.cli_binary,
            &self.root_dir,
            &mut self.ports,
            &options,
        )?;
        let indexer = self.indexer.insert(indexer);
        indexer.wait_ready(&self.config.probe()).await
    }

    pub fn stop_indexer(&mut self) -> Result<()> {
        match self.indexer.as_mut() {
            Some(indexer) => indexer.stop(),
            None => Ok(()),
        }
    }

    /// Stop storage node `index`, deleting its database if `clean`.
    pub fn stop_storage_node(&mut self, index: usize, clean: bool) -> Result<()> {
        let node = self.storage_node_mut(index)?;
        node.stop()?;
        if clean {
            node.clean_data()?;
        }
        Ok(())
    }

    pub fn start_storage_node(&mut self, index: usize) -> Result<()> {
        self.storage_node_mut(index)?.start()
    }

    pub fn stop_kv_node(&mut self, index: usize) -> Result<()> {
        self.kv_node_mut(index)?.stop()
    }

    pub fn start_kv_node(&mut self, index: usize) -> Result<()> {
        self.kv_node_mut(index)?.start()
    }

    /// Stop everything: storage, blockchain, kv, then the indexer.
    ///
    /// Errors are logged and do not stop the remaining processes from being
    /// stopped. Runs once; later calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("stopping all processes");

        if let Some(storage) = self.storage.as_mut() {
            storage.teardown();
        }
        self.blockchain.teardown();
        if let Some(kv) = self.kv.as_mut() {
            kv.teardown();
        }
        if let Err(e) = self.stop_indexer() {
            warn!("failed to stop indexer: {e}");
        }

        if self.any_alive() {
            error!("processes still alive after teardown");
        }
        self.wait_for_ports_released();
    }

    /// True if any process started by this network is still running.
    pub fn any_alive(&mut self) -> bool {
        let storage = self.storage.as_mut().is_some_and(|g| g.any_alive());
        let kv = self.kv.as_mut().is_some_and(|g| g.any_alive());
        let indexer = self.indexer.as_mut().is_some_and(IndexerProcess::is_alive);
        storage || kv || indexer || self.blockchain.any_alive()
    }

    fn wait_for_ports_released(&self) {
        let deadline = Instant::now() + PORT_RELEASE_TIMEOUT;
        let mut held: Vec<u16> = self.ports.issued().collect();
        while !held.is_empty() {
            held.retain(|port| !is_port_free(*port));
            if held.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                warn!(?held, "ports not released after {PORT_RELEASE_TIMEOUT:?}");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn cli(&self) -> &StorageCli {
        &self.cli
    }

    /// Generator seeded from the run's seed, for reproducible test data.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Random bytes drawn from [`Self::rng`].
    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.rng.fill(&mut bytes[..]);
        bytes
    }

    pub fn blockchain(&self) -> &BlockchainNodeGroup {
        &self.blockchain
    }

    pub fn blockchain_nodes(&self) -> &[GroupNode] {
        self.blockchain.nodes()
    }

    pub fn storage_nodes(&self) -> &[GroupNode] {
        self.storage.as_ref().map(|g| g.nodes()).unwrap_or_default()
    }

    pub fn kv_nodes(&self) -> &[GroupNode] {
        self.kv.as_ref().map(|g| g.nodes()).unwrap_or_default()
    }

    pub fn deployment(&self) -> Result<&Deployment> {
        self.blockchain
            .deployment()
            .ok_or_else(|| HarnessError::Config("contracts are not deployed yet".into()))
    }

    /// RPC URL of the blockchain node transactions are sent to.
    pub fn chain_rpc_url(&self) -> Result<String> {
        self.blockchain
            .rpc_url()
            .ok_or_else(|| HarnessError::Config("no blockchain node".into()))
    }

    pub fn storage_rpc_urls(&self) -> Vec<String> {
        self.storage
            .as_ref()
            .map(StorageNodeGroup::rpc_urls)
            .unwrap_or_default()
    }

    pub fn indexer_url(&self) -> Option<String> {
        self.indexer.as_ref().map(IndexerProcess::url)
    }

    /// Route to storage node `index`.
    pub fn node_route(&self, index: usize) -> Result<Route> {
        self.storage_nodes()
            .iter()
            .find(|n| n.index() == index)
            .map(|n| Route::Node(n.rpc_url()))
            .ok_or_else(|| HarnessError::Config(format!("no storage node {index}")))
    }

    /// Route through the indexer.
    pub fn indexer_route(&self) -> Result<Route> {
        self.indexer_url()
            .map(Route::Indexer)
            .ok_or_else(|| HarnessError::Config("indexer is not running".into()))
    }

    /// Transaction parameters paying from the genesis account into the
    /// flow contract.
    pub fn tx_params(&self) -> Result<TxParams> {
        TxParams::new(
            self.chain_rpc_url()?,
            self.deployment()?.flow.address(),
            &self.config.genesis_key,
        )
    }

    fn storage_node_mut(&mut self, index: usize) -> Result<&mut GroupNode> {
        self.storage
            .as_mut()
            .ok_or_else(|| HarnessError::Config("storage nodes are not set up".into()))?
            .node_mut(index)
    }

    fn kv_node_mut(&mut self, index: usize) -> Result<&mut GroupNode> {
        self.kv
            .as_mut()
            .ok_or_else(|| HarnessError::Config("kv nodes are not set up".into()))?
            .node_mut(index)
    }
}

impl Drop for TestNetwork {
    fn drop(&mut self) {
        self.shutdown();
    }
}
