//! # Backoff Policy
//!
//! One reusable exponential backoff shared by the connection supervisor, the
//! batch sync pipeline, and the backup manager. Replaces per-call-site
//! retry-sleep loops with a single configurable policy.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff: `base_delay * multiplier^attempt`, capped at
/// `max_delay`, with `max_retries` retries after the first attempt.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay, ..Self::default() }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        self.base_delay.mul_f64(factor).min(self.max_delay)
    }

    /// Total attempts a permanently failing operation receives.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Runs `operation` until it succeeds or the retry budget is exhausted.
    /// The last error is returned once `max_retries + 1` attempts failed.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        log::info!(
                            "operation '{}' succeeded after {} retries",
                            operation_name,
                            attempt
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        log::error!(
                            "operation '{}' exhausted {} attempts: {}",
                            operation_name,
                            attempt + 1,
                            err
                        );
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation_name,
                        attempt + 1,
                        self.max_attempts(),
                        err,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
