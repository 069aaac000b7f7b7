//! Lifecycle of a single external OS process.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::ports::ensure_ports_free;

/// Environment variables scrubbed from every child so node RPC traffic on
/// localhost never goes through a proxy.
pub const SCRUBBED_ENV: &[&str] = &["http_proxy", "HTTP_PROXY"];

/// Default time a process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to launch one process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Human-readable name used in logs and errors (e.g. "zgs_node_0").
    pub name: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Ports the process is expected to bind; each is checked before spawning.
    pub ports: Vec<(u16, String)>,
    /// Where stdout/stderr go. `None` discards the stream.
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl LaunchSpec {
    /// A spec capturing stdout/stderr into `stdout.log`/`stderr.log` under `work_dir`.
    pub fn captured(
        name: impl Into<String>,
        binary: impl Into<PathBuf>,
        args: Vec<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let work_dir = work_dir.into();
        Self {
            name: name.into(),
            binary: binary.into(),
            args,
            stdout: Some(work_dir.join("stdout.log")),
            stderr: Some(work_dir.join("stderr.log")),
            work_dir,
            env: BTreeMap::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_ports(mut self, ports: Vec<(u16, String)>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The full command line, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.binary.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lifecycle state of a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Stopped,
}

/// One external OS process.
///
/// `start` moves `NotStarted -> Running`; `stop` moves `Running -> Stopped`
/// and is a no-op in any other state. Captured output files stay on disk
/// after the process is gone.
#[derive(Debug)]
pub struct ProcessHandle {
    spec: LaunchSpec,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    state: ProcessState,
    stop_grace: Duration,
}

impl ProcessHandle {
    /// A handle that has not been launched yet.
    pub fn new(spec: LaunchSpec) -> Self {
        Self {
            spec,
            child: None,
            pid: None,
            started_at: None,
            state: ProcessState::NotStarted,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Override how long `stop` waits after SIGTERM before killing.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Launch a process described by `spec` and return its running handle.
    pub fn spawn(spec: LaunchSpec) -> Result<Self> {
        let mut handle = Self::new(spec);
        handle.start()?;
        Ok(handle)
    }

    /// Launch the process.
    pub fn start(&mut self) -> Result<()> {
        if self.state == ProcessState::Running {
            return Ok(());
        }

        let spec = &self.spec;
        ensure_binary(&spec.name, &spec.binary)?;
        ensure_ports_free(&spec.name, &spec.ports)?;

        info!(name = %spec.name, "starting: {}", spec.command_line());

        let mut command = Command::new(&spec.binary);
        command
            .args(&spec.args)
            .current_dir(&spec.work_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(output_sink(spec.stdout.as_deref())?)
            .stderr(output_sink(spec.stderr.as_deref())?);
        for key in SCRUBBED_ENV {
            command.env_remove(key);
        }

        let child = command.spawn().map_err(|source| HarnessError::Launch {
            name: spec.name.clone(),
            source,
        })?;

        debug!(name = %spec.name, pid = child.id(), "process started");
        self.pid = Some(child.id());
        self.child = Some(child);
        self.started_at = Some(Utc::now());
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Send SIGTERM and wait for the process to exit, killing it once the
    /// grace period has elapsed. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            if self.state == ProcessState::Running {
                self.state = ProcessState::Stopped;
            }
            return Ok(());
        };
        self.state = ProcessState::Stopped;

        if child.try_wait()?.is_some() {
            debug!(name = %self.spec.name, "process had already exited");
            return Ok(());
        }

        let pid = Pid::from_raw(child.id() as i32);
        match signal::kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            // ESRCH: exited between try_wait and kill
            Err(nix::Error::ESRCH) => {
                child.wait()?;
                return Ok(());
            }
            Err(e) => warn!(name = %self.spec.name, "could not SIGTERM {pid}: {e}"),
        }

        let deadline = Instant::now() + self.stop_grace;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait()? {
                info!(name = %self.spec.name, %status, "process stopped");
                return Ok(());
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        warn!(
            name = %self.spec.name,
            "still running {:?} after SIGTERM, killing",
            self.stop_grace
        );
        if let Err(e) = child.kill() {
            // InvalidInput: already reaped
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(e.into());
            }
        }
        child.wait()?;
        Ok(())
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn stdout_path(&self) -> Option<&Path> {
        self.spec.stdout.as_deref()
    }

    pub fn stderr_path(&self) -> Option<&Path> {
        self.spec.stderr.as_deref()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(name = %self.spec.name, "failed to stop on drop: {e}");
        }
    }
}

/// Fail with [`HarnessError::BinaryNotFound`] unless `binary` names an
/// existing file (for paths) or is found on `PATH` (for bare names).
pub fn ensure_binary(name: &str, binary: &Path) -> Result<()> {
    let found = if binary.components().count() > 1 || binary.is_absolute() {
        binary.is_file()
    } else {
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
            .unwrap_or(false)
    };

    if found {
        Ok(())
    } else {
        Err(HarnessError::BinaryNotFound {
            name: name.to_string(),
            path: binary.to_path_buf(),
        })
    }
}

/// Output files are appended to, so a restarted process keeps what the
/// previous run wrote.
fn output_sink(path: Option<&Path>) -> Result<Stdio> {
    match path {
        Some(path) => Ok(Stdio::from(
            File::options().create(true).append(true).open(path)?,
        )),
        None => Ok(Stdio::null()),
    }
}
