//! Bounded store calls.
//!
//! Reads are awaited inline and die with the request. Writes are detached onto their
//! own task so a disconnecting client cannot interrupt them halfway; the caller still
//! stops waiting once the deadline passes.

use crate::error::AuthError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default upper bound for a single store interaction
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    timeout: Duration,
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_TIMEOUT)
    }
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Await `fut`, failing with `Internal` if it outlives the deadline
    pub async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Store call timed out");
                Err(AuthError::internal(anyhow::anyhow!("{op} timed out")))
            }
        }
    }

    /// Run a write on its own task and wait for it within the deadline
    pub async fn detached<T, F>(&self, op: &'static str, fut: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AuthError>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.bounded(op, async move {
            handle
                .await
                .map_err(|e| AuthError::internal(anyhow::anyhow!("{op} task failed: {e}")))?
        })
        .await
    }
}
