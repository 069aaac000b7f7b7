//! Bounded polling for asynchronous readiness conditions.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{HarnessError, Result};

/// Default bound on any single readiness wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause between two evaluations of a condition.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Repeatedly evaluates a condition until it holds or a deadline passes.
///
/// Errors returned by the condition count as "not ready yet" and are logged
/// at debug level. A single evaluation is itself cut off at the deadline, so
/// a wait never overshoots its timeout by more than one poll interval.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProbe {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReadinessProbe {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// The same probe with a different timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Wait until `condition` returns `Ok(true)`.
    pub async fn wait_until<F, Fut>(&self, what: &str, mut condition: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());

            match tokio::time::timeout(remaining, condition()).await {
                Ok(Ok(true)) => {
                    tracing::debug!(attempts, "{what}: ready");
                    return Ok(());
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::debug!(attempts, "{what}: not ready ({e})"),
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::Timeout {
                    what: what.to_string(),
                    after: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Wait until `poll` yields `Some(value)` and return the value.
    pub async fn wait_for<T, F, Fut>(&self, what: &str, mut poll: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let found = Mutex::new(None);
        let slot = &found;
        self.wait_until(what, move || {
            let next = poll();
            async move {
                match next.await? {
                    Some(value) => {
                        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        })
        .await?;

        let found = found.into_inner().unwrap_or_else(PoisonError::into_inner);
        found.ok_or_else(|| HarnessError::Timeout {
            what: what.to_string(),
            after: self.timeout,
        })
    }
}
