//! CLI command definitions for zgs-testnet.

use std::future::Future;
use std::process::ExitCode;

use clap::Parser;
use zgs_testnet::{Outcome, Scenario, TestHarness};

mod args;
mod scenarios;
mod up;

/// CLI options for zgs-testnet.
#[derive(Parser)]
#[command(name = "zgs-testnet")]
#[command(about = "Run end-to-end scenarios against a local blockchain + storage network")]
pub enum Options {
    /// Upload a file and download it again, checking the bytes match.
    UploadDownload(scenarios::UploadDownload),
    /// Write two keys to a kv stream and read them back.
    KvRoundtrip(scenarios::KvRoundtrip),
    /// Run an external test program against the network.
    BatchUpload(scenarios::BatchUpload),
    /// Bring the network up and keep it running until Ctrl+C.
    Up(up::Up),
}

/// Trait for running CLI commands.
pub trait Run {
    fn run(self) -> impl Future<Output = color_eyre::Result<ExitCode>> + Send;
}

impl Run for Options {
    async fn run(self) -> color_eyre::Result<ExitCode> {
        match self {
            Self::UploadDownload(cmd) => cmd.run().await,
            Self::KvRoundtrip(cmd) => cmd.run().await,
            Self::BatchUpload(cmd) => cmd.run().await,
            Self::Up(cmd) => cmd.run().await,
        }
    }
}

/// Run `scenario` under a harness built from `args` and map its outcome to
/// the process exit code.
async fn run_scenario<S: Scenario + Sync>(
    args: &args::HarnessArgs,
    scenario: &S,
) -> color_eyre::Result<ExitCode> {
    let config = args.load()?;
    let report = TestHarness::new(config).run(scenario).await;

    match &report.outcome {
        Outcome::Passed => eprintln!("{}: passed", scenario.name()),
        Outcome::Failed { reason } => eprintln!("{}: failed: {reason}", scenario.name()),
        Outcome::Error { .. } => eprintln!("{}: error (see log)", scenario.name()),
    }
    if let (true, Some(root)) = (report.root_retained, &report.root_dir) {
        eprintln!("run directory kept at {}", root.display());
    }

    Ok(if report.outcome.is_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
