//! Tracing setup: console plus a per-run log file.

use std::fs::File;
use std::io::IsTerminal as _;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::error::Result;

/// Name of the log file written into every run's root directory.
pub const LOG_FILE: &str = "test_framework.log";

/// Install the global subscriber.
///
/// The console layer honours `RUST_LOG`, falling back to `level`. When
/// `root_dir` is given, every event at debug and above is also appended to
/// `<root_dir>/test_framework.log`. Returns `false` if a subscriber was
/// already installed, in which case nothing changes.
pub fn init(level: &str, root_dir: Option<&Path>) -> Result<bool> {
    // Console: filtered by RUST_LOG or `level`, coloured on a tty.
    let console = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        );

    let file = match root_dir {
        Some(dir) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_target(true)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .is_ok())
}
