//! End-to-end test harness for a local storage network.
//!
//! A run brings up blockchain nodes, deploys the storage contracts, starts
//! storage nodes (and optionally kv nodes and an indexer), runs a
//! [`Scenario`] that drives the network through the storage client CLI, and
//! tears everything down again whatever the scenario's outcome.

pub mod client;
pub mod config;
pub mod contract;
pub mod driver;
pub mod error;
pub mod extract;
pub mod group;
pub mod harness;
pub mod indexer;
pub mod logging;
pub mod network;
pub mod node;
pub mod ports;
pub mod probe;
pub mod process;
pub mod rpc;

pub use client::{Route, StorageCli, TxParams};
pub use config::{GENESIS_PRIV_KEY, HarnessConfig, NetworkParams};
pub use contract::{ContractKind, ContractProxy, Deployment};
pub use driver::{CliDriver, CliInvocation};
pub use error::{HarnessError, Result};
pub use extract::{Marker, extract, strip_ansi};
pub use group::{
    BlockchainNodeGroup, ChainBackend, GroupNode, KvNodeGroup, NodeGroup, StorageNodeGroup,
};
pub use harness::{Outcome, RunReport, Scenario, TestHarness};
pub use indexer::IndexerProcess;
pub use network::TestNetwork;
pub use node::{ConfigMap, NodeKind, NodeSpec};
pub use ports::{NodePorts, PortAllocator};
pub use probe::ReadinessProbe;
pub use process::{LaunchSpec, ProcessHandle, ProcessState};
pub use rpc::RpcClient;
