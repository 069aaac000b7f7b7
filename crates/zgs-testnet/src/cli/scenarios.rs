//! Built-in scenarios.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{OptionExt as _, WrapErr as _};
use tracing::info;
use zgs_testnet::{CliDriver, HarnessError, NetworkParams, Scenario, TestNetwork, check, check_eq};

use super::args::HarnessArgs;
use super::{Run, run_scenario};

/// Upload a file and download it again, checking the bytes match.
#[derive(Parser)]
pub struct UploadDownload {
    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Size of the uploaded file in bytes.
    #[arg(long, default_value_t = 10 * 1024)]
    pub size: usize,

    /// Talk to storage node 0 directly instead of going through an indexer.
    #[arg(long)]
    pub via_node: bool,
}

impl Scenario for UploadDownload {
    fn name(&self) -> &str {
        "upload-download"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 1).with_indexer(!self.via_node)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let route = if self.via_node {
            network.node_route(0)?
        } else {
            network.indexer_route()?
        };

        let data = network.random_bytes(self.size);
        let source = network.root_dir().join("upload_source");
        tokio::fs::write(&source, &data).await?;

        let tx = network.tx_params()?;
        let root = network.cli().upload(&tx, &route, &source).await?;
        info!(%root, "uploaded {} bytes", data.len());
        check!(
            root.len() == 66 && root.starts_with("0x"),
            "malformed root {root:?}"
        );

        // The file becomes downloadable once the nodes have synced it.
        let cli = network.cli();
        let (route_ref, root_ref) = (&route, root.as_str());
        let downloaded: PathBuf = network
            .config()
            .probe()
            .wait_for("download of uploaded file", move || async move {
                Ok(Some(cli.download(route_ref, root_ref, true).await?))
            })
            .await?;

        let bytes = tokio::fs::read(&downloaded).await?;
        check!(
            bytes == data,
            "downloaded {} bytes differ from the {} uploaded",
            bytes.len(),
            data.len()
        );
        tokio::fs::remove_file(&downloaded).await?;
        Ok(())
    }
}

impl Run for UploadDownload {
    async fn run(self) -> color_eyre::Result<ExitCode> {
        run_scenario(&self.harness, &self).await
    }
}

/// Write two keys to a kv stream and read them back.
#[derive(Parser)]
pub struct KvRoundtrip {
    #[command(flatten)]
    pub harness: HarnessArgs,
}

impl Scenario for KvRoundtrip {
    fn name(&self) -> &str {
        "kv-roundtrip"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 1)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let stream_id = format!("0x{}", hex::encode(network.random_bytes(32)));
        network.setup_kv_node(0, vec![stream_id.clone()], None).await?;

        let tx = network.tx_params()?;
        let route = network.node_route(0)?;
        let keys = ["a", "b"];
        let values = ["1", "2"];
        network
            .cli()
            .kv_write(&tx, &route, &stream_id, &keys, &values)
            .await?;

        let kv_url = network
            .kv_nodes()
            .first()
            .map(|n| n.rpc_url())
            .ok_or_eyre("kv node missing after setup")?;
        let expected: BTreeMap<String, String> = keys
            .iter()
            .zip(values)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let cli = network.cli();
        let (url, stream, wanted) = (kv_url.as_str(), stream_id.as_str(), &expected);
        let read = network
            .config()
            .probe()
            .wait_for("kv stream to replay the write", move || async move {
                let read = cli.kv_read(url, stream, &keys).await?;
                Ok((read == *wanted).then_some(read))
            })
            .await
            .wrap_err("kv-read never returned the written values")?;

        check_eq!(read, expected);
        Ok(())
    }
}

impl Run for KvRoundtrip {
    async fn run(self) -> color_eyre::Result<ExitCode> {
        run_scenario(&self.harness, &self).await
    }
}

/// Run an external test program with the genesis key, the chain RPC URL,
/// the comma-joined storage node URLs and the indexer URL appended to its
/// arguments.
#[derive(Parser)]
pub struct BatchUpload {
    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Program to run, e.g. `go`.
    #[arg(long)]
    pub program: PathBuf,

    /// Seconds the program may take.
    #[arg(long, default_value_t = 600)]
    pub program_timeout: u64,

    /// Leading arguments, e.g. `run ./batch_upload_test/main.go`.
    #[arg(last = true)]
    pub program_args: Vec<String>,
}

impl Scenario for BatchUpload {
    fn name(&self) -> &str {
        "batch-upload"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 1).with_indexer(true)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let indexer = network.indexer_url().ok_or_eyre("indexer did not start")?;

        let mut args = self.program_args.clone();
        args.extend([
            network.config().genesis_key.clone(),
            network.chain_rpc_url()?,
            network.storage_rpc_urls().join(","),
            indexer,
        ]);

        let driver = CliDriver::new(&self.program, network.root_dir())
            .with_timeout(Duration::from_secs(self.program_timeout));
        match driver.invoke(&args).await {
            Ok(run) => {
                info!(output = %run.output_path.display(), "test program passed");
                Ok(())
            }
            Err(HarnessError::CliExit {
                code, output_path, ..
            }) => Err(HarnessError::Assertion(format!(
                "test program exited with {code:?}, output in {}",
                output_path.display()
            ))
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Run for BatchUpload {
    async fn run(self) -> color_eyre::Result<ExitCode> {
        run_scenario(&self.harness, &self).await
    }
}
