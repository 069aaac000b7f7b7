//! Typed wrappers over the storage client's subcommands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::driver::CliDriver;
use crate::error::{HarnessError, Result};
use crate::extract::{self, Marker};

/// Gas limit passed to every transaction-sending subcommand.
pub const GAS_LIMIT: u64 = 10_000_000;

const LOG_LEVEL: &str = "debug";

/// Where the client sends or fetches data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Talk to a single storage node directly.
    Node(String),
    /// Let the indexer pick nodes.
    Indexer(String),
}

impl Route {
    fn push_args(&self, args: &mut Vec<String>) {
        let (flag, url) = match self {
            Self::Node(url) => ("--node", url),
            Self::Indexer(url) => ("--indexer", url),
        };
        args.push(flag.to_string());
        args.push(url.clone());
    }
}

/// The on-chain side of a write: which chain, which flow contract, which
/// account pays.
#[derive(Debug, Clone)]
pub struct TxParams {
    pub chain_url: String,
    pub contract: String,
    /// 32-byte private key, rendered `0x`-prefixed.
    pub key: String,
    /// Skip submitting the flow transaction when the data is already on chain.
    pub skip_tx: bool,
}

impl TxParams {
    /// Build from a hex private key with or without a `0x` prefix.
    pub fn new(chain_url: impl Into<String>, contract: impl Into<String>, key: &str) -> Result<Self> {
        let bytes = hex::decode(key.trim_start_matches("0x"))
            .map_err(|e| HarnessError::Config(format!("invalid private key: {e}")))?;
        if bytes.len() != 32 {
            return Err(HarnessError::Config(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            chain_url: chain_url.into(),
            contract: contract.into(),
            key: format!("0x{}", hex::encode(bytes)),
            skip_tx: true,
        })
    }

    pub fn with_skip_tx(mut self, skip_tx: bool) -> Self {
        self.skip_tx = skip_tx;
        self
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.extend([
            "--url".to_string(),
            self.chain_url.clone(),
            "--contract".to_string(),
            self.contract.clone(),
            "--key".to_string(),
            self.key.clone(),
            format!("--skip-tx={}", self.skip_tx),
        ]);
    }
}

/// The storage client binary, driven through a [`CliDriver`].
#[derive(Debug, Clone)]
pub struct StorageCli {
    driver: CliDriver,
    download_dir: PathBuf,
}

impl StorageCli {
    /// Output captures and downloads land in `root_dir`.
    pub fn new(driver: CliDriver, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            download_dir: root_dir.into(),
        }
    }

    pub fn driver(&self) -> &CliDriver {
        &self.driver
    }

    /// Upload `file` and return its content root.
    pub async fn upload(&self, tx: &TxParams, route: &Route, file: &Path) -> Result<String> {
        let args = upload_args(tx, route, file);
        self.driver.invoke_for(&args, &Marker::content_root()).await
    }

    /// Download `root` into a fresh file in the run directory and return its path.
    pub async fn download(&self, route: &Route, root: &str, proof: bool) -> Result<PathBuf> {
        let dest = self.download_dir.join(format!(
            "download_{root}_{}",
            Utc::now().timestamp_micros()
        ));
        let args = download_args(route, root, proof, &dest);
        self.driver.invoke(&args).await?;
        Ok(dest)
    }

    /// Write `keys[i] = values[i]` into `stream_id`.
    pub async fn kv_write(
        &self,
        tx: &TxParams,
        route: &Route,
        stream_id: &str,
        keys: &[&str],
        values: &[&str],
    ) -> Result<()> {
        if keys.len() != values.len() {
            return Err(HarnessError::Config(format!(
                "kv-write got {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let mut args = vec!["kv-write".to_string()];
        tx.push_args(&mut args);
        args.extend([
            "--stream-id".to_string(),
            stream_id.to_string(),
            "--stream-keys".to_string(),
            keys.join(","),
            "--stream-values".to_string(),
            values.join(","),
            "--log-level".to_string(),
            LOG_LEVEL.to_string(),
            "--gas-limit".to_string(),
            GAS_LIMIT.to_string(),
        ]);
        route.push_args(&mut args);

        self.driver.invoke(&args).await?;
        Ok(())
    }

    /// Read `keys` from `stream_id` on a kv node.
    pub async fn kv_read(
        &self,
        node_url: &str,
        stream_id: &str,
        keys: &[&str],
    ) -> Result<BTreeMap<String, String>> {
        let args = vec![
            "kv-read".to_string(),
            "--node".to_string(),
            node_url.to_string(),
            "--stream-id".to_string(),
            stream_id.to_string(),
            "--stream-keys".to_string(),
            keys.join(","),
            "--log-level".to_string(),
            LOG_LEVEL.to_string(),
        ];
        let invocation = self.driver.invoke(&args).await?;
        extract::extract_json_map(&invocation.output)
    }
}

fn upload_args(tx: &TxParams, route: &Route, file: &Path) -> Vec<String> {
    let mut args = vec!["upload".to_string()];
    tx.push_args(&mut args);
    args.extend([
        "--log-level".to_string(),
        LOG_LEVEL.to_string(),
        "--gas-limit".to_string(),
        GAS_LIMIT.to_string(),
    ]);
    route.push_args(&mut args);
    args.push("--file".to_string());
    args.push(file.display().to_string());
    args
}

fn download_args(route: &Route, root: &str, proof: bool, dest: &Path) -> Vec<String> {
    let mut args = vec![
        "download".to_string(),
        "--file".to_string(),
        dest.display().to_string(),
        "--root".to_string(),
        root.to_string(),
        format!("--proof={proof}"),
        "--log-level".to_string(),
        LOG_LEVEL.to_string(),
    ];
    route.push_args(&mut args);
    args
}

/// Arguments for a long-running `indexer` process listening on `port`.
pub fn indexer_args(
    port: u16,
    trusted: &str,
    discover_node: Option<&str>,
    discover_ports: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "indexer".to_string(),
        "--endpoint".to_string(),
        format!(":{port}"),
        "--trusted".to_string(),
        trusted.to_string(),
        "--log-level".to_string(),
        LOG_LEVEL.to_string(),
    ];
    if let Some(ports) = discover_ports {
        args.push("--discover-ports".to_string());
        args.push(ports.to_string());
    }
    if let Some(node) = discover_node {
        args.push("--node".to_string());
        args.push(node.to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "46b9e861b63d3509c88b7817275a30d22d62c8cd8fa6486ddee35ef0d8e0495f";

    fn tx() -> TxParams {
        TxParams::new("http://127.0.0.1:11000", "0x0000000000000000000000000000000000000001", KEY)
            .unwrap()
    }

    #[test]
    fn test_key_is_normalised() {
        assert_eq!(tx().key, format!("0x{KEY}"));
        assert_eq!(
            TxParams::new("u", "c", &format!("0x{KEY}")).unwrap().key,
            format!("0x{KEY}")
        );
        assert!(TxParams::new("u", "c", "0x1234").is_err());
        assert!(TxParams::new("u", "c", "not hex").is_err());
    }

    #[test]
    fn test_upload_args_via_indexer() {
        let args = upload_args(
            &tx(),
            &Route::Indexer("http://127.0.0.1:12345".to_string()),
            Path::new("/tmp/data.bin"),
        );
        assert_eq!(
            args,
            vec![
                "upload",
                "--url",
                "http://127.0.0.1:11000",
                "--contract",
                "0x0000000000000000000000000000000000000001",
                "--key",
                &format!("0x{KEY}"),
                "--skip-tx=true",
                "--log-level",
                "debug",
                "--gas-limit",
                "10000000",
                "--indexer",
                "http://127.0.0.1:12345",
                "--file",
                "/tmp/data.bin",
            ]
        );
    }

    #[test]
    fn test_download_args_via_node() {
        let args = download_args(
            &Route::Node("http://127.0.0.1:11002".to_string()),
            "0xabc",
            true,
            Path::new("/tmp/out"),
        );
        assert_eq!(
            args,
            vec![
                "download",
                "--file",
                "/tmp/out",
                "--root",
                "0xabc",
                "--proof=true",
                "--log-level",
                "debug",
                "--node",
                "http://127.0.0.1:11002",
            ]
        );
    }

    #[test]
    fn test_indexer_args() {
        assert_eq!(
            indexer_args(12000, "http://a", Some("http://b"), Some("11002,11004")),
            vec![
                "indexer",
                "--endpoint",
                ":12000",
                "--trusted",
                "http://a",
                "--log-level",
                "debug",
                "--discover-ports",
                "11002,11004",
                "--node",
                "http://b",
            ]
        );
        assert_eq!(indexer_args(1, "t", None, None).len(), 7);
    }
}
