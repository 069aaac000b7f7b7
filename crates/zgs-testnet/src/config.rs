//! Run configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::group::ChainBackend;
use crate::node::ConfigMap;
use crate::ports::DEFAULT_PORT_MIN;
use crate::probe::ReadinessProbe;

/// Private key of the account funded at genesis.
pub const GENESIS_PRIV_KEY: &str =
    "46b9e861b63d3509c88b7817275a30d22d62c8cd8fa6486ddee35ef0d8e0495f";

/// Everything a run needs to know that does not depend on the scenario.
///
/// Loaded from built-in defaults, then an optional TOML file; the binary
/// applies environment variables and flags on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub chain_backend: ChainBackend,
    pub chain_binary: PathBuf,
    pub storage_binary: PathBuf,
    pub kv_binary: PathBuf,
    pub cli_binary: PathBuf,
    /// Directory holding `<Contract>.json` build artifacts.
    pub contract_path: PathBuf,
    /// Console log level; the run's log file always records debug.
    pub log_level: String,
    /// Root directory for the run. Created if missing.
    pub tmp_dir: Option<PathBuf>,
    /// Replaced by a symlink to the run's root directory.
    pub dev_dir: Option<PathBuf>,
    pub random_seed: Option<u64>,
    pub port_min: u16,
    #[serde(with = "secs")]
    pub cli_timeout: Duration,
    #[serde(with = "secs")]
    pub readiness_timeout: Duration,
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    /// Delay between two node starts within a group.
    #[serde(with = "secs")]
    pub stagger: Duration,
    /// Pause after the last storage node starts, before readiness polling.
    #[serde(with = "secs")]
    pub launch_wait: Duration,
    /// SIGTERM-to-SIGKILL grace period for node processes.
    #[serde(with = "secs")]
    pub stop_grace: Duration,
    pub genesis_key: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            chain_backend: ChainBackend::Zg,
            chain_binary: PathBuf::from("0gchaind"),
            storage_binary: PathBuf::from("zgs_node"),
            kv_binary: PathBuf::from("zgs_kv"),
            cli_binary: PathBuf::from("0g-storage-client"),
            contract_path: PathBuf::from("storage-contracts-abis"),
            log_level: "info".to_string(),
            tmp_dir: None,
            dev_dir: None,
            random_seed: None,
            port_min: DEFAULT_PORT_MIN,
            cli_timeout: crate::driver::DEFAULT_CLI_TIMEOUT,
            readiness_timeout: crate::probe::DEFAULT_TIMEOUT,
            poll_interval: crate::probe::DEFAULT_POLL_INTERVAL,
            stagger: Duration::from_secs(1),
            launch_wait: Duration::from_secs(1),
            stop_grace: crate::process::DEFAULT_STOP_GRACE,
            genesis_key: GENESIS_PRIV_KEY.to_string(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with the TOML file at `path`, if any.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(toml::from_str(&std::fs::read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }

    /// Probe configured with the readiness timeout and poll interval.
    pub fn probe(&self) -> ReadinessProbe {
        ReadinessProbe::new(self.readiness_timeout, self.poll_interval)
    }
}

/// Shape of the network a scenario needs before its body runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub num_blockchain_nodes: usize,
    pub num_storage_nodes: usize,
    /// Per-index overrides on top of each group's defaults.
    pub blockchain_overrides: BTreeMap<usize, ConfigMap>,
    pub storage_overrides: BTreeMap<usize, ConfigMap>,
    /// Start an indexer trusting every storage node once storage is up.
    pub indexer: bool,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            num_blockchain_nodes: 1,
            num_storage_nodes: 1,
            blockchain_overrides: BTreeMap::new(),
            storage_overrides: BTreeMap::new(),
            indexer: false,
        }
    }
}

impl NetworkParams {
    pub fn nodes(blockchain: usize, storage: usize) -> Self {
        Self {
            num_blockchain_nodes: blockchain,
            num_storage_nodes: storage,
            ..Default::default()
        }
    }

    pub fn with_indexer(mut self, indexer: bool) -> Self {
        self.indexer = indexer;
        self
    }

    /// Override one storage node option.
    pub fn storage_option(
        mut self,
        index: usize,
        key: impl Into<String>,
        value: impl Into<toml::Value>,
    ) -> Self {
        self.storage_overrides
            .entry(index)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Override one blockchain node option.
    pub fn blockchain_option(
        mut self,
        index: usize,
        key: impl Into<String>,
        value: impl Into<toml::Value>,
    ) -> Self {
        self.blockchain_overrides
            .entry(index)
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// Durations as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
