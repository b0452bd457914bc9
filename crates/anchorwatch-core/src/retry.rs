use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exponential backoff for operations that must eventually succeed, such
/// as rebuilding the block cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub backoff_unit: Duration,
    pub backoff_factor: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            backoff_unit: Duration::from_secs(1),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Why [`RetryPolicy::run`] stopped without a result.
#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted(E),
    Cancelled,
}

impl RetryPolicy {
    /// Wait before the `attempt`-th retry (zero-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt).unwrap_or(u32::MAX);
        let factor = self.backoff_factor.saturating_pow(exp);
        self.backoff_unit
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, retrying up to `max_retries` times.
    /// Cancellation aborts the wait between attempts.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.max_retries {
                return Err(RetryError::Exhausted(err));
            }
            let delay = self.delay(attempt);
            warn!(error = %err, attempt = attempt + 1, delay = ?delay, "{what} failed, retrying");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
