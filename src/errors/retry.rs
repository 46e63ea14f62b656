use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::PulseError;

/// Retry settings for upstream fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget, rate-limited retries included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for transient failures; scaled by the attempt number.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    /// Fallback delay for 429 responses without a Retry-After header.
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2
}

fn default_rate_limit_delay() -> u64 {
    30
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay(),
            rate_limit_delay_secs: default_rate_limit_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, or None when the error is terminal.
    ///
    /// A 429 sleeps for the upstream Retry-After value when one was sent,
    /// else the configured default. Other retryable failures sleep for
    /// `base_delay * attempt` plus sub-second jitter. `attempt` is 1-indexed.
    pub fn delay_for(&self, err: &PulseError, attempt: u32) -> Option<Duration> {
        let class = err.classify();
        if !class.retryable {
            return None;
        }
        match err {
            PulseError::RateLimit { retry_after, .. } => Some(Duration::from_secs(
                retry_after.unwrap_or(self.rate_limit_delay_secs),
            )),
            _ => {
                let scaled = (self.base_delay_secs * u64::from(attempt)) as f64;
                let jitter: f64 = rand::random::<f64>();
                Some(Duration::from_secs_f64(scaled + jitter))
            }
        }
    }
}

/// Run an async operation with retries per the policy. Non-retryable
/// errors fail immediately; retryable ones sleep the policy's delay and
/// go again until the attempt budget runs out.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut factory: F,
) -> Result<T, PulseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PulseError>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match factory().await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.delay_for(&e, attempt) {
                Some(delay) if attempt < max_attempts => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max = max_attempts,
                        error = %e,
                        "Retrying operation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Some(_) => {
                    warn!(operation = operation_name, attempt, "Retry budget exhausted");
                    return Err(e);
                }
                None => return Err(e),
            },
        }
    }
}
