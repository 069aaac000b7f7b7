//! Top-level run lifecycle: set up, run a scenario, tear down, decide.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use futures_util::FutureExt as _;
use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, NetworkParams};
use crate::error::HarnessError;
use crate::logging;
use crate::network::TestNetwork;

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;

/// Prefix of auto-created run directories.
pub const ROOT_DIR_PREFIX: &str = "zg_client_test_";

/// Environment variable naming the run directory when none is configured.
pub const LOG_DIR_ENV: &str = "ZG_CLIENT_TESTS_LOG_DIR";

/// A test body and the network it needs.
pub trait Scenario {
    fn name(&self) -> &str;

    fn params(&self) -> NetworkParams {
        NetworkParams::default()
    }

    /// Whether Ctrl+C during the body fails the run. Scenarios that wait for
    /// Ctrl+C themselves return `false`.
    fn interruptible(&self) -> bool {
        true
    }

    fn run(&self, network: &mut TestNetwork) -> impl Future<Output = color_eyre::Result<()>> + Send;
}

/// Verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// An expectation did not hold, or the run was interrupted.
    Failed { reason: String },
    /// Something other than an expectation went wrong.
    Error { cause: String },
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Passed => EXIT_PASSED,
            Self::Failed { .. } | Self::Error { .. } => EXIT_FAILED,
        }
    }

    /// Classify the result of a setup step or scenario body.
    pub fn classify(result: color_eyre::Result<()>) -> Self {
        let Err(report) = result else {
            return Self::Passed;
        };
        let harness_error = report
            .chain()
            .find_map(|cause| cause.downcast_ref::<HarnessError>());
        match harness_error {
            Some(HarnessError::Assertion(reason)) => Self::Failed {
                reason: reason.clone(),
            },
            Some(HarnessError::Interrupted) => Self::Failed {
                reason: HarnessError::Interrupted.to_string(),
            },
            _ => Self::Error {
                cause: format!("{report:?}"),
            },
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Error { cause } => write!(f, "error: {cause}"),
        }
    }
}

/// Lifecycle phase, logged as the run advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    NetworkUp,
    Running,
    TearingDown,
    Done,
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Outcome,
    /// The run directory, or `None` if it could not be created.
    pub root_dir: Option<PathBuf>,
    /// False once a passing run has removed its directory.
    pub root_retained: bool,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

pub struct TestHarness {
    config: HarnessConfig,
}

impl TestHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run `scenario` end to end. Never returns early: every failure is
    /// folded into the report's [`Outcome`], and every started process is
    /// stopped before this returns.
    pub async fn run<S: Scenario>(&self, scenario: &S) -> RunReport {
        let mut phase = Phase::Init;
        let root_dir = match self.init() {
            Ok(root_dir) => root_dir,
            Err(e) => {
                let outcome = Outcome::Error {
                    cause: format!("{e:?}"),
                };
                error!("{} could not start: {outcome}", scenario.name());
                return RunReport {
                    outcome,
                    root_dir: None,
                    root_retained: false,
                };
            }
        };
        info!(scenario = scenario.name(), "root dir: {}", root_dir.display());

        let mut network = TestNetwork::new(self.config.clone(), &root_dir);

        advance(&mut phase, Phase::NetworkUp);
        let params = scenario.params();
        let setup = tokio::select! {
            result = AssertUnwindSafe(network.setup_nodes(&params)).catch_unwind() => {
                result.map(|r| r.map_err(color_eyre::Report::from))
            }
            _ = tokio::signal::ctrl_c() => Ok(Err(HarnessError::Interrupted.into())),
        };

        let outcome = match setup {
            Err(panic) => {
                error!("network setup panicked");
                Outcome::Error {
                    cause: format!("setup panicked: {}", panic_message(&*panic)),
                }
            }
            Ok(Err(report)) => {
                error!("network setup failed");
                Outcome::classify(Err(report))
            }
            Ok(Ok(())) => {
                advance(&mut phase, Phase::Running);
                debug!("========== start to run tests ==========");
                let body = AssertUnwindSafe(scenario.run(&mut network)).catch_unwind();
                let result = if scenario.interruptible() {
                    tokio::select! {
                        result = body => result,
                        _ = tokio::signal::ctrl_c() => {
                            warn!("exiting after keyboard interrupt");
                            Ok(Err(HarnessError::Interrupted.into()))
                        }
                    }
                } else {
                    body.await
                };
                match result {
                    Ok(result) => Outcome::classify(result),
                    // a panicking assert in the body is a failed expectation
                    Err(panic) => Outcome::Failed {
                        reason: format!("panicked: {}", panic_message(&*panic)),
                    },
                }
            }
        };

        match &outcome {
            Outcome::Passed => {}
            Outcome::Failed { reason } => error!("assertion failed: {reason}"),
            Outcome::Error { cause } => {
                error!("test exception: {cause}");
                error!("test data are not deleted: {}", root_dir.display());
            }
        }

        advance(&mut phase, Phase::TearingDown);
        network.shutdown();
        drop(network);

        advance(&mut phase, Phase::Done);
        let root_retained = self.finish(&outcome, &root_dir);
        RunReport {
            outcome,
            root_dir: Some(root_dir),
            root_retained,
        }
    }

    /// Create the run directory, point the dev symlink at it and start logging.
    fn init(&self) -> color_eyre::Result<PathBuf> {
        let root_dir = select_root_dir(
            self.config.tmp_dir.as_deref(),
            std::env::var_os(LOG_DIR_ENV).map(PathBuf::from),
        )?;
        if !logging::init(&self.config.log_level, Some(&root_dir))? {
            debug!("tracing already initialised; not logging to {}", root_dir.display());
        }
        if let Some(dev_dir) = &self.config.dev_dir {
            link_dev_dir(&root_dir, dev_dir)?;
            info!("symlink: {}", dev_dir.display());
        }
        Ok(root_dir)
    }

    /// Log the verdict and delete the root directory if the run passed.
    /// Returns whether the directory was kept.
    fn finish(&self, outcome: &Outcome, root_dir: &Path) -> bool {
        if !outcome.is_passed() {
            error!(
                "test failed. test logging available at {}",
                root_dir.join(logging::LOG_FILE).display()
            );
            return true;
        }
        info!("tests successful");
        match std::fs::remove_dir_all(root_dir) {
            Ok(()) => false,
            Err(e) => {
                warn!("could not remove {}: {e}", root_dir.display());
                root_dir.exists()
            }
        }
    }
}

/// The message of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn advance(phase: &mut Phase, next: Phase) {
    debug!(from = ?*phase, to = ?next, "phase");
    *phase = next;
}

/// Explicit directory (created if missing), else the environment's, else a
/// fresh temporary directory.
fn select_root_dir(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
) -> std::io::Result<PathBuf> {
    let dir = match (explicit, from_env) {
        (Some(dir), _) => std::path::absolute(dir)?,
        (None, Some(dir)) => std::path::absolute(dir)?,
        (None, None) => {
            return Ok(tempfile::Builder::new()
                .prefix(ROOT_DIR_PREFIX)
                .tempdir()?
                .keep());
        }
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Replace whatever is at `dev_dir` with a symlink to `root_dir`.
fn link_dev_dir(root_dir: &Path, dev_dir: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(dev_dir) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(dev_dir)?,
        Ok(_) => std::fs::remove_file(dev_dir)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    symlink_dir(root_dir, dev_dir)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
