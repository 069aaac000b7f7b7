//! Node groups: sets of same-kind processes with a shared bootstrap protocol.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::node::{ConfigMap, ConfigStyle, NodeKind, NodeSpec};
use crate::ports::PortAllocator;
use crate::process::{LaunchSpec, ProcessHandle, ProcessState};
use crate::rpc::RpcClient;

mod blockchain;
mod kv;
mod storage;

pub use blockchain::{BlockchainNodeGroup, ChainBackend};
pub use kv::KvNodeGroup;
pub use storage::StorageNodeGroup;

/// Shared resources a group draws on while it is set up.
pub struct GroupContext<'a> {
    pub config: &'a HarnessConfig,
    pub root_dir: &'a Path,
    pub ports: &'a mut PortAllocator,
}

/// Bring-up and tear-down contract shared by every group.
pub trait NodeGroup {
    fn kind(&self) -> NodeKind;

    /// Create `count` nodes, start them in index order with a fixed stagger,
    /// and wait for the group's readiness conditions.
    fn setup(
        &mut self,
        ctx: &mut GroupContext<'_>,
        count: usize,
        overrides: &BTreeMap<usize, ConfigMap>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn nodes(&self) -> &[GroupNode];

    fn nodes_mut(&mut self) -> &mut [GroupNode];

    /// Stop every node in index order. Errors are logged, not returned, so
    /// one stuck process cannot keep the rest running.
    fn teardown(&mut self) {
        for node in self.nodes_mut() {
            if let Err(e) = node.stop() {
                warn!(node = %node.name(), "failed to stop: {e}");
            }
        }
    }

    /// True if any node process is still running.
    fn any_alive(&mut self) -> bool {
        self.nodes_mut().iter_mut().any(GroupNode::is_alive)
    }
}

/// One node: its immutable spec plus the process currently running it.
///
/// A stopped node is restarted with a fresh [`ProcessHandle`] built from the
/// same spec.
#[derive(Debug)]
pub struct GroupNode {
    spec: NodeSpec,
    style: ConfigStyle,
    /// Arguments placed before the configuration arguments (a subcommand).
    leading_args: Vec<String>,
    handle: ProcessHandle,
    rpc: RpcClient,
    stop_grace: Duration,
}

impl GroupNode {
    pub fn new(
        spec: NodeSpec,
        style: ConfigStyle,
        leading_args: Vec<String>,
        stop_grace: Duration,
    ) -> Result<Self> {
        let rpc = RpcClient::new(spec.rpc_url())?;
        let handle = ProcessHandle::new(launch_spec(&spec, style, &leading_args))
            .with_stop_grace(stop_grace);
        Ok(Self {
            spec,
            style,
            leading_args,
            handle,
            rpc,
            stop_grace,
        })
    }

    /// Write the node's configuration and launch it.
    pub fn start(&mut self) -> Result<()> {
        match self.handle.state() {
            ProcessState::Running => return Ok(()),
            ProcessState::Stopped => {
                self.handle = ProcessHandle::new(launch_spec(
                    &self.spec,
                    self.style,
                    &self.leading_args,
                ))
                .with_stop_grace(self.stop_grace);
            }
            ProcessState::NotStarted => {}
        }
        self.spec.prepare(self.style)?;
        self.handle.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.handle.stop()
    }

    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    pub fn name(&self) -> String {
        self.spec.name()
    }

    pub fn index(&self) -> usize {
        self.spec.index
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn rpc_url(&self) -> String {
        self.spec.rpc_url()
    }

    /// Delete the node's database directory. The node must be stopped.
    pub fn clean_data(&self) -> Result<()> {
        if self.handle.state() == ProcessState::Running {
            return Err(HarnessError::Config(format!(
                "{} is running; stop it before cleaning its data",
                self.name()
            )));
        }
        let db = self.db_dir();
        if db.exists() {
            info!(node = %self.name(), "removing {}", db.display());
            std::fs::remove_dir_all(db)?;
        }
        Ok(())
    }

    fn db_dir(&self) -> PathBuf {
        let db = self
            .spec
            .config
            .get("db_dir")
            .and_then(toml::Value::as_str)
            .unwrap_or("db");
        self.spec.data_dir.join(db)
    }
}

fn launch_spec(spec: &NodeSpec, style: ConfigStyle, leading_args: &[String]) -> LaunchSpec {
    let mut args = leading_args.to_vec();
    args.extend(spec.config_args(style));
    LaunchSpec::captured(spec.name(), &spec.binary, args, &spec.data_dir)
        .with_ports(spec.ports.describe(&spec.name()))
}

/// Start nodes in order, sleeping `stagger` before every start but the first.
async fn start_staggered(nodes: &mut [GroupNode], stagger: Duration) -> Result<()> {
    for (i, node) in nodes.iter_mut().enumerate() {
        if i > 0 {
            tokio::time::sleep(stagger).await;
        }
        node.start()?;
    }
    Ok(())
}

/// Wait until every node answers `method` on its RPC endpoint.
async fn wait_for_rpc(
    nodes: &[GroupNode],
    method: &str,
    probe: &crate::probe::ReadinessProbe,
) -> Result<()> {
    for node in nodes {
        let rpc = node.rpc();
        probe
            .wait_until(&format!("{} rpc", node.name()), move || async move {
                Ok(rpc.is_reachable(method).await)
            })
            .await?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ports::NodePorts;

    fn sleeper_node(root: &Path, index: usize) -> GroupNode {
        script_node(root, index, "exec sleep 30")
    }

    fn script_node(root: &Path, index: usize, script: &str) -> GroupNode {
        let spec = NodeSpec::new(
            NodeKind::Storage,
            index,
            "sh",
            NodePorts {
                rpc: 0,
                p2p: 0,
            },
            root,
        )
        .with_config(
            ConfigMap::from([("db_dir".to_string(), toml::Value::from("db"))]),
            None,
        );
        GroupNode::new(
            spec,
            ConfigStyle::Flags,
            vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn test_restart_uses_fresh_handle() {
        let root = tempfile::tempdir().unwrap();
        let mut node = sleeper_node(root.path(), 0);

        node.start().unwrap();
        let first_pid = node.handle().pid();
        assert!(node.is_alive());
        assert!(node.spec().data_dir.is_dir());

        node.stop().unwrap();
        assert!(!node.is_alive());

        node.start().unwrap();
        assert!(node.is_alive());
        assert_ne!(node.handle().pid(), first_pid);
        node.stop().unwrap();
    }

    #[test]
    fn test_restart_keeps_first_run_output() {
        let root = tempfile::tempdir().unwrap();
        let mut node = script_node(root.path(), 2, "echo run-$$; exec sleep 30");

        node.start().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        node.stop().unwrap();
        node.start().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        node.stop().unwrap();

        let stdout =
            std::fs::read_to_string(node.spec().data_dir.join("stdout.log")).unwrap();
        let runs: Vec<&str> = stdout.lines().filter(|l| l.starts_with("run-")).collect();
        assert_eq!(runs.len(), 2, "{stdout}");
        assert_ne!(runs[0], runs[1]);
    }

    #[test]
    fn test_clean_data_requires_stop() {
        let root = tempfile::tempdir().unwrap();
        let mut node = sleeper_node(root.path(), 1);
        node.start().unwrap();
        std::fs::create_dir_all(node.spec().data_dir.join("db")).unwrap();

        assert!(node.clean_data().is_err());
        node.stop().unwrap();
        node.clean_data().unwrap();
        assert!(!node.spec().data_dir.join("db").exists());
    }
}
