//! The indexer: a long-running CLI subcommand that routes uploads and
//! downloads to storage nodes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::info;

use crate::client::indexer_args;
use crate::error::Result;
use crate::ports::PortAllocator;
use crate::probe::ReadinessProbe;
use crate::process::{LaunchSpec, ProcessHandle};

/// The indexer gets longer to exit than node processes.
pub const INDEXER_STOP_GRACE: Duration = Duration::from_secs(20);

/// What the indexer trusts and discovers.
#[derive(Debug, Clone, Default)]
pub struct IndexerOptions {
    /// Comma-separated storage node URLs whose data the indexer trusts.
    pub trusted: String,
    /// Node used to discover further storage nodes.
    pub discover_node: Option<String>,
    /// Comma-separated ports probed on discovered hosts.
    pub discover_ports: Option<String>,
}

#[derive(Debug)]
pub struct IndexerProcess {
    handle: ProcessHandle,
    port: u16,
}

impl IndexerProcess {
    /// Launch `cli_binary indexer ...` in `<root>/indexer0`.
    pub fn start(
        cli_binary: &Path,
        root_dir: &Path,
        ports: &mut PortAllocator,
        options: &IndexerOptions,
    ) -> Result<Self> {
        let port = ports.allocate()?;
        let dir: PathBuf = root_dir.join("indexer0");
        std::fs::create_dir_all(&dir)?;

        let args = indexer_args(
            port,
            &options.trusted,
            options.discover_node.as_deref(),
            options.discover_ports.as_deref(),
        );
        let spec = LaunchSpec::captured("indexer", cli_binary, args, &dir)
            .with_ports(vec![(port, "indexer endpoint".to_string())]);
        let handle = ProcessHandle::new(spec).with_stop_grace(INDEXER_STOP_GRACE);

        let mut indexer = Self { handle, port };
        indexer.handle.start()?;
        Ok(indexer)
    }

    /// Wait until the endpoint accepts TCP connections.
    pub async fn wait_ready(&self, probe: &ReadinessProbe) -> Result<()> {
        let address = format!("127.0.0.1:{}", self.port);
        let address = address.as_str();
        probe
            .wait_until("indexer endpoint", move || async move {
                Ok(TcpStream::connect(address).await.is_ok())
            })
            .await?;
        info!(url = %self.url(), "indexer ready");
        Ok(())
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.handle.stop()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[tokio::test]
    async fn test_indexer_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        // Stand-in that records its arguments and never opens the endpoint.
        let bin = root.path().join("fake-cli");
        std::fs::write(&bin, "#!/bin/sh\necho \"$@\"\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut ports = PortAllocator::new(23000);
        let mut indexer = IndexerProcess::start(
            &bin,
            root.path(),
            &mut ports,
            &IndexerOptions {
                trusted: "http://127.0.0.1:11002".to_string(),
                discover_node: None,
                discover_ports: Some("11002".to_string()),
            },
        )
        .unwrap();

        assert!(indexer.is_alive());
        assert!(root.path().join("indexer0").is_dir());
        assert_eq!(indexer.url(), format!("http://127.0.0.1:{}", indexer.port()));

        // nothing listens, so readiness must time out
        let probe = ReadinessProbe::new(Duration::from_millis(300), Duration::from_millis(50));
        assert!(indexer.wait_ready(&probe).await.unwrap_err().is_timeout());

        indexer.stop().unwrap();
        assert!(!indexer.is_alive());

        let stdout = std::fs::read_to_string(indexer.handle().stdout_path().unwrap()).unwrap();
        assert!(stdout.starts_with("indexer --endpoint :"));
        assert!(stdout.contains("--discover-ports 11002"));
    }
}
