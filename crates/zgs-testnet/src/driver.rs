//! Bounded invocations of an external command-line tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{HarnessError, Result};
use crate::extract::{self, Marker};
use crate::process::{SCRUBBED_ENV, ensure_binary};

/// Default bound on a single CLI invocation.
pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix of the files that hold each invocation's combined output.
pub const OUTPUT_PREFIX: &str = "zgs_client_output_";

/// A completed invocation that exited zero.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Combined stdout and stderr, in the order the tool wrote them.
    pub output: Vec<u8>,
    pub exit_code: Option<i32>,
    /// File the output was captured to. Kept in the run directory.
    pub output_path: PathBuf,
}

impl CliInvocation {
    /// Extract a required marker from the captured output.
    pub fn extract(&self, marker: &Marker) -> Result<String> {
        extract::extract(&self.output, marker)
    }
}

/// Runs one executable with a per-call timeout, capturing stdout and stderr
/// into a single file under `output_dir`.
#[derive(Debug, Clone)]
pub struct CliDriver {
    binary: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
}

impl CliDriver {
    pub fn new(binary: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_dir: output_dir.into(),
            timeout: DEFAULT_CLI_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run with the driver's default timeout.
    pub async fn invoke(&self, args: &[String]) -> Result<CliInvocation> {
        self.invoke_with_timeout(args, self.timeout).await
    }

    /// Run and wait up to `timeout`.
    ///
    /// On timeout the child is killed and reaped before
    /// [`HarnessError::CliTimeout`] is returned. A non-zero exit returns
    /// [`HarnessError::CliExit`] carrying the full output.
    pub async fn invoke_with_timeout(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<CliInvocation> {
        ensure_binary("cli", &self.binary)?;
        let command_line = self.command_line(args);

        let (file, output_path) = tempfile::Builder::new()
            .prefix(OUTPUT_PREFIX)
            .tempfile_in(&self.output_dir)?
            .keep()
            .map_err(|e| e.error)?;

        info!("running: {command_line}");
        debug!(output = %output_path.display(), "capturing cli output");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file.try_clone()?))
            .stderr(Stdio::from(file))
            .kill_on_drop(true);
        for key in SCRUBBED_ENV {
            command.env_remove(key);
        }

        let mut child = command.spawn().map_err(|source| HarnessError::Launch {
            name: command_line.clone(),
            source,
        })?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                error!(output = %output_path.display(), "`{command_line}` timed out after {timeout:?}");
                child.start_kill()?;
                child.wait().await?;
                return Err(HarnessError::CliTimeout {
                    command: command_line,
                    after: timeout,
                    output_path,
                });
            }
        };

        let output = tokio::fs::read(&output_path).await?;

        if !status.success() {
            error!(
                output = %output_path.display(),
                "`{command_line}` failed with {status}"
            );
            return Err(HarnessError::CliExit {
                command: command_line,
                code: status.code(),
                output: String::from_utf8_lossy(&output).into_owned(),
                output_path,
            });
        }

        Ok(CliInvocation {
            args: args.to_vec(),
            timeout,
            output,
            exit_code: status.code(),
            output_path,
        })
    }

    /// Run and extract `marker` from the output.
    pub async fn invoke_for(&self, args: &[String], marker: &Marker) -> Result<String> {
        let invocation = self.invoke(args).await?;
        invocation.extract(marker).inspect_err(|_| {
            error!(
                output = %invocation.output_path.display(),
                "{} missing from cli output",
                marker.what
            )
        })
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.binary.display().to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
