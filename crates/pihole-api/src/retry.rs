// Retry executor
//
// Generic "try, classify, back off, retry" loop around one network
// operation. Backoff is quadratic in the attempt number with no jitter,
// and every delay races the client's cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Error;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; at most `retries + 1` attempts run.
    pub retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_base: Duration) -> Self {
        Self {
            retries,
            backoff_base,
        }
    }

    /// Delay slept before retry number `attempt` (counted from 1).
    ///
    /// `delay = attempt² × backoff_base`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the budget is spent. The most recent error is returned.
    ///
    /// `op` receives the zero-based attempt index.
    pub async fn run<T, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        retryable: P,
        mut op: F,
    ) -> Result<T, Error>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        P: Fn(&Error) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = self.delay_for(attempt);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retries && retryable(&err) => {
                    attempt += 1;
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = u64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(u64::MAX),
                        "request failed, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}
