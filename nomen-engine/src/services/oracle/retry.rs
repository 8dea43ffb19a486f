//! Retry policy for oracle calls

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::transport::OracleError;

/// How many times a call is attempted and how long to wait between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first attempt included
    pub max_attempts: u32,
    pub delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

/// Last error of a call that ran out of attempts
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: OracleError,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, counting attempts from 1
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let base = self.delay.mul_f64(factor).min(self.max_delay);
        if self.jitter && !base.is_zero() {
            let spread = (base.as_millis() as u64 / 4).max(1);
            base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
        } else {
            base
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Oracle call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_transient() || attempt >= max_attempts {
                        tracing::warn!(operation, attempt, error = %error, "Oracle call failed");
                        return Err(RetryFailure { attempts: attempt, error });
                    }
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying oracle call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
