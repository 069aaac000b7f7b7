//! Blockchain nodes: genesis, peering, block production and contracts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{GroupContext, GroupNode, NodeGroup, start_staggered, wait_for_rpc};
use crate::contract::{self, Deployment};
use crate::error::{HarnessError, Result};
use crate::node::{ConfigMap, ConfigStyle, NodeKind, NodeSpec};

const CHAIN_ID: &str = "zgtendermint_16600-1";

const BLOCK_TIME: Duration = Duration::from_secs(1);

/// Which blockchain implementation backs the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainBackend {
    /// Multi-node chain bootstrapped from a shared static genesis.
    #[default]
    Zg,
    /// Single-node development chain configured through flags.
    GethDev,
}

impl ChainBackend {
    /// True if every node must be given the same genesis before any starts.
    pub fn requires_genesis(&self) -> bool {
        matches!(self, Self::Zg)
    }

    /// Both backends produce a block every second.
    pub fn block_time(&self) -> Duration {
        BLOCK_TIME
    }

    pub fn max_nodes(&self) -> Option<usize> {
        match self {
            Self::Zg => None,
            Self::GethDev => Some(1),
        }
    }

    fn config_style(&self) -> ConfigStyle {
        match self {
            Self::Zg => ConfigStyle::TomlFile,
            Self::GethDev => ConfigStyle::Flags,
        }
    }

    fn leading_args(&self) -> Vec<String> {
        match self {
            Self::Zg => vec!["start".to_string()],
            Self::GethDev => Vec::new(),
        }
    }

    /// Default configuration for node `spec`, given every node's P2P address.
    fn defaults(&self, spec: &NodeSpec, peers: &[String]) -> ConfigMap {
        let mut config = ConfigMap::new();
        let mut set = |key: &str, value: toml::Value| {
            config.insert(key.to_string(), value);
        };
        match self {
            Self::Zg => {
                set("chain_id", CHAIN_ID.into());
                set("home", spec.data_dir.display().to_string().into());
                set("genesis_file", "config/genesis.json".into());
                set("json_rpc_address", spec.rpc_address().into());
                set("p2p_laddr", format!("127.0.0.1:{}", spec.ports.p2p).into());
                let others: Vec<String> = peers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != spec.index)
                    .map(|(_, p)| p.clone())
                    .collect();
                set("persistent_peers", others.into());
                set(
                    "timeout_commit",
                    format!("{}ms", self.block_time().as_millis()).into(),
                );
            }
            Self::GethDev => {
                set("dev", true.into());
                set("dev.period", (self.block_time().as_secs() as i64).into());
                set("datadir", spec.data_dir.display().to_string().into());
                set("http", true.into());
                set("http.addr", "127.0.0.1".into());
                set("http.port", i64::from(spec.ports.rpc).into());
                set(
                    "http.api",
                    vec!["eth", "net", "web3", "txpool", "debug"].into(),
                );
                set("port", i64::from(spec.ports.p2p).into());
                set("nodiscover", true.into());
                set("ipcdisable", true.into());
            }
        }
        config
    }
}

/// The chain the storage network settles on.
#[derive(Debug)]
pub struct BlockchainNodeGroup {
    backend: ChainBackend,
    binary: PathBuf,
    nodes: Vec<GroupNode>,
    deployment: Option<Deployment>,
}

impl BlockchainNodeGroup {
    pub fn new(backend: ChainBackend, binary: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            binary: binary.into(),
            nodes: Vec::new(),
            deployment: None,
        }
    }

    pub fn backend(&self) -> ChainBackend {
        self.backend
    }

    /// Contracts deployed during setup.
    pub fn deployment(&self) -> Option<&Deployment> {
        self.deployment.as_ref()
    }

    /// RPC URL of the first node, the one contracts are deployed from.
    pub fn rpc_url(&self) -> Option<String> {
        self.nodes.first().map(GroupNode::rpc_url)
    }
}

impl NodeGroup for BlockchainNodeGroup {
    fn kind(&self) -> NodeKind {
        NodeKind::Blockchain
    }

    async fn setup(
        &mut self,
        ctx: &mut GroupContext<'_>,
        count: usize,
        overrides: &BTreeMap<usize, ConfigMap>,
    ) -> Result<()> {
        if count == 0 {
            return Err(HarnessError::Config(
                "at least one blockchain node is required".to_string(),
            ));
        }
        if let Some(max) = self.backend.max_nodes() {
            if count > max {
                return Err(HarnessError::Config(format!(
                    "{:?} backend supports at most {max} node(s), {count} requested",
                    self.backend
                )));
            }
        }

        let mut specs = Vec::with_capacity(count);
        for index in 0..count {
            let ports = ctx.ports.allocate_node()?;
            specs.push(NodeSpec::new(
                NodeKind::Blockchain,
                index,
                &self.binary,
                ports,
                ctx.root_dir,
            ));
        }
        let peers: Vec<String> = specs
            .iter()
            .map(|s| format!("127.0.0.1:{}", s.ports.p2p))
            .collect();

        let style = self.backend.config_style();
        for spec in specs {
            let defaults = self.backend.defaults(&spec, &peers);
            let index = spec.index;
            let spec = spec.with_config(defaults, overrides.get(&index));
            self.nodes.push(GroupNode::new(
                spec,
                style,
                self.backend.leading_args(),
                ctx.config.stop_grace,
            )?);
        }

        if self.backend.requires_genesis() {
            init_genesis(ctx.root_dir, &self.nodes, self.backend)?;
            info!("genesis initialized for {count} node(s)");
        }

        start_staggered(&mut self.nodes, ctx.config.stagger).await?;

        let probe = ctx.config.probe();
        wait_for_rpc(&self.nodes, "eth_blockNumber", &probe).await?;

        let expected_peers = (count - 1) as u64;
        for node in &self.nodes {
            let rpc = node.rpc();
            if count > 1 {
                probe
                    .wait_until(&format!("{} peers", node.name()), move || async move {
                        Ok(rpc.peer_count().await? >= expected_peers)
                    })
                    .await?;
            }
            probe
                .wait_until(&format!("{} first block", node.name()), move || async move {
                    Ok(rpc.block_number().await? > 0)
                })
                .await?;
        }

        let deployer = &self.nodes[0];
        let deployment =
            contract::deploy_contracts(deployer.rpc(), &ctx.config.contract_path, &probe).await?;
        info!(
            flow = %deployment.flow.address(),
            mine = %deployment.mine.address(),
            reward = %deployment.reward.address(),
            "contracts deployed"
        );

        for node in &self.nodes[1..] {
            let rpc = node.rpc();
            let tx_hash = deployment.tx_hash.as_str();
            probe
                .wait_until(
                    &format!("{} to see deployment {tx_hash}", node.name()),
                    move || async move { Ok(rpc.transaction_receipt(tx_hash).await?.is_some()) },
                )
                .await?;
        }

        self.deployment = Some(deployment);
        Ok(())
    }

    fn nodes(&self) -> &[GroupNode] {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut [GroupNode] {
        &mut self.nodes
    }
}

/// Write `<root>/genesis.json` and copy it into every node's `config/`.
fn init_genesis(root_dir: &Path, nodes: &[GroupNode], backend: ChainBackend) -> Result<()> {
    let validators: Vec<_> = nodes
        .iter()
        .map(|node| {
            json!({
                "name": node.name(),
                "p2p_address": format!("127.0.0.1:{}", node.spec().ports.p2p),
            })
        })
        .collect();
    let genesis = json!({
        "chain_id": CHAIN_ID,
        "genesis_time": Utc::now().to_rfc3339(),
        "initial_height": "1",
        "block_time_ms": backend.block_time().as_millis() as u64,
        "validators": validators,
        "app_state": {},
    });

    let source = root_dir.join("genesis.json");
    std::fs::write(&source, serde_json::to_vec_pretty(&genesis)?)?;

    for node in nodes {
        let config_dir = node.spec().data_dir.join("config");
        std::fs::create_dir_all(&config_dir)?;
        std::fs::copy(&source, config_dir.join("genesis.json"))?;
        debug!(node = %node.name(), "genesis copied");
    }
    Ok(())
}
