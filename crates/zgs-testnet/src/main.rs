use std::process::ExitCode;

use clap::Parser as _;

use crate::cli::Run as _;

mod cli;

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;
    // Tracing is installed per run, once the run directory holding the log
    // file exists.
    cli::Options::parse().run().await
}
