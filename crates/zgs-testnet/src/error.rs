//! Error taxonomy for the harness.

use std::path::PathBuf;
use std::time::Duration;

/// Every failure the harness can surface from setup, a scenario body, or teardown.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The executable does not exist at the configured path.
    #[error("{name}: binary not found at {}", .path.display())]
    BinaryNotFound { name: String, path: PathBuf },

    /// A port assigned to the process is already bound by someone else.
    #[error("{name}: port {port} is already in use")]
    PortInUse { name: String, port: u16 },

    /// The OS refused to spawn the process.
    #[error("{name}: failed to launch")]
    Launch {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A readiness condition was not reached in time.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// An external CLI invocation exceeded its bound and was killed.
    #[error("`{command}` did not finish within {after:?} (output: {})", .output_path.display())]
    CliTimeout {
        command: String,
        after: Duration,
        output_path: PathBuf,
    },

    /// An external CLI invocation exited non-zero.
    #[error("`{command}` exited with {} (output: {})\n{output}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")), .output_path.display())]
    CliExit {
        command: String,
        code: Option<i32>,
        output: String,
        output_path: PathBuf,
    },

    /// The expected result could not be recovered from captured output.
    #[error("could not find {what} in output:\n{output}")]
    Parse { what: String, output: String },

    /// A JSON-RPC call returned an error object or a malformed response.
    #[error("rpc {method} on {url} failed: {message}")]
    Rpc {
        url: String,
        method: String,
        message: String,
    },

    /// A scenario body's expectation did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The run was interrupted by a signal.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl HarnessError {
    /// Returns true for both readiness and CLI timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CliTimeout { .. })
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Return an [`HarnessError::Assertion`] from the enclosing function unless
/// `cond` holds.
///
/// ```rust
/// fn body(n: usize) -> color_eyre::Result<()> {
///     zgs_testnet::check!(n == 2, "expected 2 nodes, got {n}");
///     Ok(())
/// }
/// assert!(body(2).is_ok());
/// assert!(body(3).is_err());
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        $crate::check!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::HarnessError::Assertion(format!($($arg)+)).into());
        }
    };
}

/// Like [`check!`], comparing two values for equality.
#[macro_export]
macro_rules! check_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left, right) => {
                $crate::check!(
                    *left == *right,
                    "{} != {}: {:?} != {:?}",
                    stringify!($left),
                    stringify!($right),
                    left,
                    right
                );
            }
        }
    };
}
