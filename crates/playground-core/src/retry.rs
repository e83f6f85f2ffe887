//! Fixed-spacing retry for transient sandbox failures

use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: how many attempts, and how long to wait between them.
///
/// Only errors reporting [`crate::PlaygroundError::is_retryable`] are retried;
/// anything else is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    max_attempts: Option<u32>,
    spacing: Duration,
}

impl Retry {
    /// Give up after `attempts` tries in total
    pub fn bounded(attempts: u32, spacing: Duration) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            spacing,
        }
    }

    /// Keep trying for as long as the error is transient
    pub fn forever(spacing: Duration) -> Self {
        Self {
            max_attempts: None,
            spacing,
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.max_attempts.map_or(true, |m| attempt < m) => {
                    warn!(
                        "{} failed (attempt {}), retrying in {:?}: {}",
                        what, attempt, self.spacing, e
                    );
                    tokio::time::sleep(self.spacing).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
