//! Binary discovery for integration tests.

use std::path::PathBuf;
use std::process::Command;

use color_eyre::eyre::eyre;
use zgs_testnet::{ChainBackend, HarnessConfig};

/// Resolve a binary from `env`, falling back to `name` on `PATH`.
pub fn find_binary(env: &str, name: &str) -> color_eyre::Result<PathBuf> {
    if let Some(path) = std::env::var_os(env) {
        return Ok(PathBuf::from(path));
    }
    if let Ok(output) = Command::new("which").arg(name).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }
    Err(eyre!("{name} not found: set {env} or put it on PATH"))
}

/// Harness configuration pointing at the binaries under test.
pub fn config_from_env(port_min: u16) -> color_eyre::Result<HarnessConfig> {
    let backend = match std::env::var("ZG_CHAIN_BACKEND").as_deref() {
        Ok("geth-dev") => ChainBackend::GethDev,
        _ => ChainBackend::Zg,
    };
    let chain_name = match backend {
        ChainBackend::Zg => "0gchaind",
        ChainBackend::GethDev => "geth",
    };
    let mut config = HarnessConfig {
        chain_backend: backend,
        chain_binary: find_binary("ZG_BINARY", chain_name)?,
        storage_binary: find_binary("ZGS", "zgs_node")?,
        cli_binary: find_binary("ZGS_CLI", "0g-storage-client")?,
        port_min,
        random_seed: Some(u64::from(port_min)),
        ..Default::default()
    };
    // only needed by kv tests
    if let Ok(kv) = find_binary("ZGS_KV", "zgs_kv") {
        config.kv_binary = kv;
    }
    if let Some(path) = std::env::var_os("ZG_CONTRACT_PATH") {
        config.contract_path = PathBuf::from(path);
    }
    Ok(config)
}
