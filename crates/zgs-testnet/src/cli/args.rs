//! Harness options shared by every subcommand.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use color_eyre::eyre::Context as _;
use zgs_testnet::{ChainBackend, HarnessConfig};

/// Blockchain backend options for the CLI.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliBackend {
    /// Multi-node chain with a shared static genesis.
    Zg,
    /// Single-node development chain.
    GethDev,
}

impl From<CliBackend> for ChainBackend {
    fn from(b: CliBackend) -> Self {
        match b {
            CliBackend::Zg => ChainBackend::Zg,
            CliBackend::GethDev => ChainBackend::GethDev,
        }
    }
}

/// Flags and environment variables win over the `--config` file, which wins
/// over built-in defaults.
#[derive(Debug, Args)]
pub struct HarnessArgs {
    /// TOML file with harness settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Blockchain implementation to run.
    #[arg(long, value_enum)]
    pub chain_backend: Option<CliBackend>,

    /// Path to the blockchain node binary.
    #[arg(long = "zg-binary", env = "ZG_BINARY")]
    pub chain_binary: Option<PathBuf>,

    /// Path to the storage node binary.
    #[arg(long = "zerog-storage-binary", env = "ZGS")]
    pub storage_binary: Option<PathBuf>,

    /// Path to the kv node binary.
    #[arg(long = "zgs-kv", env = "ZGS_KV")]
    pub kv_binary: Option<PathBuf>,

    /// Path to the storage client CLI.
    #[arg(long = "zerog-storage-client", env = "ZGS_CLI")]
    pub cli_binary: Option<PathBuf>,

    /// Directory holding the compiled contract artifacts.
    #[arg(long)]
    pub contract_path: Option<PathBuf>,

    /// Console log level. The run's log file always records debug.
    #[arg(short = 'l', long = "loglevel")]
    pub log_level: Option<String>,

    /// Root directory for node data and logs.
    #[arg(long = "tmpdir")]
    pub tmp_dir: Option<PathBuf>,

    /// Path replaced by a symlink to the latest run directory.
    #[arg(long = "devdir")]
    pub dev_dir: Option<PathBuf>,

    /// Seed for generated test data.
    #[arg(long = "randomseed")]
    pub random_seed: Option<u64>,

    /// First port handed out to nodes.
    #[arg(long)]
    pub port_min: Option<u16>,

    /// Seconds each storage client invocation may take.
    #[arg(long)]
    pub cli_timeout: Option<f64>,
}

impl HarnessArgs {
    pub fn load(&self) -> color_eyre::Result<HarnessConfig> {
        let mut config = HarnessConfig::load(self.config.as_deref()).wrap_err_with(|| {
            format!("failed to load harness config from {:?}", self.config)
        })?;

        if let Some(backend) = self.chain_backend {
            config.chain_backend = backend.into();
        }
        overlay(&mut config.chain_binary, &self.chain_binary);
        overlay(&mut config.storage_binary, &self.storage_binary);
        overlay(&mut config.kv_binary, &self.kv_binary);
        overlay(&mut config.cli_binary, &self.cli_binary);
        overlay(&mut config.contract_path, &self.contract_path);
        overlay(&mut config.log_level, &self.log_level);
        if self.tmp_dir.is_some() {
            config.tmp_dir.clone_from(&self.tmp_dir);
        }
        if self.dev_dir.is_some() {
            config.dev_dir.clone_from(&self.dev_dir);
        }
        if self.random_seed.is_some() {
            config.random_seed = self.random_seed;
        }
        overlay(&mut config.port_min, &self.port_min);
        if let Some(secs) = self.cli_timeout {
            config.cli_timeout = std::time::Duration::try_from_secs_f64(secs)
                .wrap_err("invalid --cli-timeout")?;
        }
        Ok(config)
    }
}

fn overlay<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        target.clone_from(value);
    }
}
