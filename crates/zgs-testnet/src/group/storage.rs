use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use super::{GroupContext, GroupNode, NodeGroup, start_staggered, wait_for_rpc};
use crate::contract::Deployment;
use crate::error::{HarnessError, Result};
use crate::node::{ConfigMap, ConfigStyle, NodeKind, NodeSpec};

/// Storage nodes, each following the flow contract on the chain.
#[derive(Debug)]
pub struct StorageNodeGroup {
    binary: PathBuf,
    deployment: Deployment,
    chain_url: String,
    nodes: Vec<GroupNode>,
}

impl StorageNodeGroup {
    /// Contract addresses are fixed into each node's configuration.
    pub fn new(binary: impl Into<PathBuf>, deployment: Deployment, chain_url: String) -> Self {
        Self {
            binary: binary.into(),
            deployment,
            chain_url,
            nodes: Vec::new(),
        }
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        self.nodes.iter().map(GroupNode::rpc_url).collect()
    }

    pub fn node_mut(&mut self, index: usize) -> Result<&mut GroupNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.index() == index)
            .ok_or_else(|| HarnessError::Config(format!("no storage node {index}")))
    }

    fn defaults(&self, spec: &NodeSpec, boot_nodes: &[String]) -> ConfigMap {
        let d = &self.deployment;
        ConfigMap::from([
            ("network_libp2p_port".into(), i64::from(spec.ports.p2p).into()),
            ("network_discovery_port".into(), i64::from(spec.ports.p2p).into()),
            ("network_enr_address".into(), "127.0.0.1".into()),
            ("rpc_listen_address".into(), spec.rpc_address().into()),
            ("network_boot_nodes".into(), boot_nodes.to_vec().into()),
            ("blockchain_rpc_endpoint".into(), self.chain_url.clone().into()),
            ("log_contract_address".into(), d.flow.address().into()),
            ("mine_contract_address".into(), d.mine.address().into()),
            ("reward_contract_address".into(), d.reward.address().into()),
            ("log_sync_start_block_number".into(), (d.block as i64).into()),
            ("db_dir".into(), "db".into()),
            ("network_dir".into(), "network".into()),
            ("log_directory".into(), "log".into()),
        ])
    }
}

/// Every node but node 0 bootstraps from node 0's discovery port.
fn boot_nodes(index: usize, boot_port: Option<u16>) -> Vec<String> {
    match boot_port {
        Some(port) if index != 0 => vec![format!("/ip4/127.0.0.1/udp/{port}")],
        _ => Vec::new(),
    }
}

impl NodeGroup for StorageNodeGroup {
    fn kind(&self) -> NodeKind {
        NodeKind::Storage
    }

    async fn setup(
        &mut self,
        ctx: &mut GroupContext<'_>,
        count: usize,
        overrides: &BTreeMap<usize, ConfigMap>,
    ) -> Result<()> {
        let first = self.nodes.len();
        let mut specs = Vec::with_capacity(count);
        for index in first..first + count {
            let ports = ctx.ports.allocate_node()?;
            specs.push(NodeSpec::new(
                NodeKind::Storage,
                index,
                &self.binary,
                ports,
                ctx.root_dir,
            ));
        }

        let boot_port = self
            .nodes
            .first()
            .map(|n| n.spec().ports.p2p)
            .or_else(|| specs.first().map(|s| s.ports.p2p));

        for spec in specs {
            let index = spec.index;
            let defaults = self.defaults(&spec, &boot_nodes(index, boot_port));
            let spec = spec.with_config(defaults, overrides.get(&index));
            self.nodes.push(GroupNode::new(
                spec,
                ConfigStyle::TomlFile,
                Vec::new(),
                ctx.config.stop_grace,
            )?);
        }

        start_staggered(&mut self.nodes[first..], ctx.config.stagger).await?;

        info!(
            "waiting {:?} for storage nodes to launch",
            ctx.config.launch_wait
        );
        tokio::time::sleep(ctx.config.launch_wait).await;

        wait_for_rpc(&self.nodes[first..], "zgs_getStatus", &ctx.config.probe()).await
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
    use std::path::Path;

    use super::*;
    use crate::contract::{ContractKind, ContractProxy};
    use crate::ports::NodePorts;

    fn deployment() -> Deployment {
        Deployment {
            flow: ContractProxy::new(ContractKind::Flow, "0xf1"),
            mine: ContractProxy::new(ContractKind::Mine, "0xa1"),
            reward: ContractProxy::new(ContractKind::Reward, "0xb1"),
            tx_hash: "0xdead".to_string(),
            block: 7,
        }
    }

    #[test]
    fn test_contract_addresses_are_baked_in() {
        let group = StorageNodeGroup::new(
            "zgs_node",
            deployment(),
            "http://127.0.0.1:11000".to_string(),
        );
        let spec = NodeSpec::new(
            NodeKind::Storage,
            0,
            "zgs_node",
            NodePorts {
                rpc: 11004,
                p2p: 11005,
            },
            Path::new("/tmp/run"),
        );
        let config = group.defaults(&spec, &[]);

        assert_eq!(config["log_contract_address"].as_str(), Some("0xf1"));
        assert_eq!(config["mine_contract_address"].as_str(), Some("0xa1"));
        assert_eq!(config["reward_contract_address"].as_str(), Some("0xb1"));
        assert_eq!(config["log_sync_start_block_number"].as_integer(), Some(7));
        assert_eq!(config["rpc_listen_address"].as_str(), Some("127.0.0.1:11004"));
        assert_eq!(
            config["blockchain_rpc_endpoint"].as_str(),
            Some("http://127.0.0.1:11000")
        );
    }

    #[test]
    fn test_only_node_zero_has_no_boot_node() {
        assert!(boot_nodes(0, Some(11005)).is_empty());
        assert_eq!(boot_nodes(1, Some(11005)), ["/ip4/127.0.0.1/udp/11005"]);
        // a later batch still points at node 0, never at its own first node
        assert_eq!(boot_nodes(3, Some(11005)), ["/ip4/127.0.0.1/udp/11005"]);
        assert!(boot_nodes(1, None).is_empty());
    }
}
