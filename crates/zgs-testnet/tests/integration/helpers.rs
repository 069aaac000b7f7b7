//! Helpers shared by the integration tests.

use std::path::PathBuf;

use zgs_testnet::{Outcome, Route, Scenario, TestHarness, TestNetwork};

use crate::binaries::config_from_env;

/// Run `scenario` on a fresh network whose ports start at `port_min`, and
/// fail the test unless it passes.
pub async fn run_passing<S: Scenario>(port_min: u16, scenario: &S) -> color_eyre::Result<()> {
    let report = TestHarness::new(config_from_env(port_min)?)
        .run(scenario)
        .await;
    match report.outcome {
        Outcome::Passed => Ok(()),
        outcome => Err(color_eyre::eyre::eyre!(
            "{} {outcome} (run dir: {:?})",
            scenario.name(),
            report.root_dir
        )),
    }
}

/// Write `len` seeded random bytes to a file under the run directory.
pub async fn random_file(
    network: &mut TestNetwork,
    name: &str,
    len: usize,
) -> color_eyre::Result<(PathBuf, Vec<u8>)> {
    let data = network.random_bytes(len);
    let path = network.root_dir().join(name);
    tokio::fs::write(&path, &data).await?;
    Ok((path, data))
}

/// Download `root` through `route`, retrying until the nodes have synced it,
/// and return the bytes.
pub async fn download_when_synced(
    network: &TestNetwork,
    route: &Route,
    root: &str,
) -> color_eyre::Result<Vec<u8>> {
    let cli = network.cli();
    let path = network
        .config()
        .probe()
        .wait_for(&format!("download of {root}"), move || async move {
            Ok(Some(cli.download(route, root, true).await?))
        })
        .await?;
    let bytes = tokio::fs::read(&path).await?;
    tokio::fs::remove_file(&path).await?;
    Ok(bytes)
}
