use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::error::{Error, Result};

/// Exponential backoff bounded by both an attempt count and a total wait.
///
/// Only errors for which [`Error::is_retryable`] holds are retried. When the
/// budget runs out a rate-limit signal becomes [`Error::RateLimitExceeded`];
/// transient network errors are returned with the attempt count attached.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            max_total_wait: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_total_wait: Duration) -> Self {
        Self {
            max_retries,
            max_total_wait,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based). A server hint wins over
    /// the computed backoff.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut waited = Duration::ZERO;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!("Request succeeded after {} retries", attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    let hint = match &err {
                        Error::RateLimited { retry_after_secs } => {
                            retry_after_secs.map(Duration::from_secs)
                        }
                        _ => None,
                    };
                    let delay = self.delay_for(attempt, hint);

                    if attempt > self.max_retries || waited + delay > self.max_total_wait {
                        return Err(exhausted(err, attempt));
                    }

                    tracing::warn!(
                        "{}; retrying in {:?} (attempt {}/{})",
                        err,
                        delay,
                        attempt,
                        self.max_retries
                    );
                    sleep(delay).await;
                    waited += delay;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn exhausted(err: Error, attempts: u32) -> Error {
    match err {
        Error::RateLimited { .. } => Error::RateLimitExceeded { attempts },
        Error::TransientNetwork(msg) => {
            Error::TransientNetwork(format!("{} (gave up after {} attempts)", msg, attempts))
        }
        other => other,
    }
}
