use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{GroupContext, GroupNode, NodeGroup, start_staggered, wait_for_rpc};
use crate::contract::Deployment;
use crate::error::{HarnessError, Result};
use crate::node::{ConfigMap, ConfigStyle, NodeKind, NodeSpec};

/// Key-value nodes replaying streams out of the storage nodes.
#[derive(Debug)]
pub struct KvNodeGroup {
    binary: PathBuf,
    deployment: Deployment,
    chain_url: String,
    storage_urls: Vec<String>,
    /// Streams the next nodes to be set up subscribe to.
    stream_ids: Vec<String>,
    nodes: Vec<GroupNode>,
}

impl KvNodeGroup {
    pub fn new(
        binary: impl Into<PathBuf>,
        deployment: Deployment,
        chain_url: String,
        storage_urls: Vec<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            deployment,
            chain_url,
            storage_urls,
            stream_ids: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_stream_ids(mut self, stream_ids: Vec<String>) -> Self {
        self.stream_ids = stream_ids;
        self
    }

    /// Start a single node at `index`, subscribed to `stream_ids`.
    pub async fn setup_node(
        &mut self,
        ctx: &mut GroupContext<'_>,
        index: usize,
        stream_ids: Vec<String>,
        overrides: Option<&ConfigMap>,
    ) -> Result<()> {
        if self.nodes.iter().any(|n| n.index() == index) {
            return Err(HarnessError::Config(format!("kv node {index} already exists")));
        }
        self.stream_ids = stream_ids;
        let node = self.build_node(ctx, index, overrides)?;
        self.nodes.push(node);

        let Some(node) = self.nodes.last_mut() else {
            return Ok(());
        };
        node.start()?;
        tokio::time::sleep(ctx.config.stagger).await;
        wait_for_rpc(std::slice::from_ref(node), "kv_getStatus", &ctx.config.probe()).await
    }

    pub fn node_mut(&mut self, index: usize) -> Result<&mut GroupNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.index() == index)
            .ok_or_else(|| HarnessError::Config(format!("no kv node {index}")))
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        self.nodes.iter().map(GroupNode::rpc_url).collect()
    }

    fn build_node(
        &self,
        ctx: &mut GroupContext<'_>,
        index: usize,
        overrides: Option<&ConfigMap>,
    ) -> Result<GroupNode> {
        let ports = ctx.ports.allocate_node()?;
        let spec = NodeSpec::new(NodeKind::Kv, index, &self.binary, ports, ctx.root_dir);
        let defaults = self.defaults(&spec);
        GroupNode::new(
            spec.with_config(defaults, overrides),
            ConfigStyle::TomlFile,
            Vec::new(),
            ctx.config.stop_grace,
        )
    }

    fn defaults(&self, spec: &NodeSpec) -> ConfigMap {
        ConfigMap::from([
            ("stream_ids".into(), self.stream_ids.clone().into()),
            ("rpc_listen_address".into(), spec.rpc_address().into()),
            ("zgs_node_urls".into(), self.storage_urls.join(",").into()),
            ("blockchain_rpc_endpoint".into(), self.chain_url.clone().into()),
            (
                "log_contract_address".into(),
                self.deployment.flow.address().into(),
            ),
            (
                "log_sync_start_block_number".into(),
                (self.deployment.block as i64).into(),
            ),
            ("db_dir".into(), "db".into()),
            ("kv_db_dir".into(), kv_db_dir(&spec.data_dir).into()),
        ])
    }
}

fn kv_db_dir(data_dir: &Path) -> String {
    data_dir.join("kv.DB").display().to_string()
}

impl NodeGroup for KvNodeGroup {
    fn kind(&self) -> NodeKind {
        NodeKind::Kv
    }

    async fn setup(
        &mut self,
        ctx: &mut GroupContext<'_>,
        count: usize,
        overrides: &BTreeMap<usize, ConfigMap>,
    ) -> Result<()> {
        let first = self.nodes.len();
        for index in first..first + count {
            let node = self.build_node(ctx, index, overrides.get(&index))?;
            self.nodes.push(node);
        }
        start_staggered(&mut self.nodes[first..], ctx.config.stagger).await?;
        tokio::time::sleep(ctx.config.stagger).await;
        wait_for_rpc(&self.nodes[first..], "kv_getStatus", &ctx.config.probe()).await
    }

    fn nodes(&self) -> &[GroupNode] {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut [GroupNode] {
        &mut self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractKind, ContractProxy};
    use crate::ports::NodePorts;

    #[test]
    fn test_stream_ids_and_storage_urls_in_config() {
        let deployment = Deployment {
            flow: ContractProxy::new(ContractKind::Flow, "0xf1"),
            mine: ContractProxy::new(ContractKind::Mine, "0xa1"),
            reward: ContractProxy::new(ContractKind::Reward, "0xb1"),
            tx_hash: "0xdead".to_string(),
            block: 3,
        };
        let group = KvNodeGroup::new(
            "zgs_kv",
            deployment,
            "http://127.0.0.1:11000".to_string(),
            vec!["http://127.0.0.1:11002".to_string(), "http://127.0.0.1:11004".to_string()],
        )
        .with_stream_ids(vec!["0x01".to_string()]);

        let spec = NodeSpec::new(
            NodeKind::Kv,
            0,
            "zgs_kv",
            NodePorts {
                rpc: 11010,
                p2p: 11011,
            },
            Path::new("/tmp/run"),
        );
        let config = group.defaults(&spec);

        assert_eq!(config["stream_ids"], toml::Value::from(vec!["0x01"]));
        assert_eq!(
            config["zgs_node_urls"].as_str(),
            Some("http://127.0.0.1:11002,http://127.0.0.1:11004")
        );
        assert_eq!(config["kv_db_dir"].as_str(), Some("/tmp/run/zgs_kv0/kv.DB"));
        assert_eq!(config["log_contract_address"].as_str(), Some("0xf1"));
    }
}
