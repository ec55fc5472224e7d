use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff schedule. Attempt numbering starts at zero; the
/// delay before retrying attempt `n` is `base · multiplier^n`, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    /// The critical aggregator-read schedule: 5 attempts at `2000·2^n` ms.
    pub fn aggregator() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(2000),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter: false,
        }
    }

    /// Default transport schedule for non-critical provider paths.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(20),
            jitter: true,
        }
    }

    /// Exactly one replay, no delay growth. Used for the graph store's
    /// connection-closed-prematurely probe.
    pub fn single_retry() -> Self {
        Self {
            max_attempts: 2,
            base: Duration::from_millis(200),
            multiplier: 1.0,
            max_backoff: Duration::from_millis(200),
            jitter: false,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_backoff.as_millis() as f64);
        let millis = if self.jitter {
            let mut rng = rand::thread_rng();
            rng.gen_range((capped / 2.0)..=capped)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

/// Runs `operation` under `policy`, retrying while `should_retry` accepts
/// the error. The last error is returned once the budget is exhausted.
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: BackoffPolicy,
    description: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    operation = description,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry predicate for provider transports: throttling and transient
/// transport failures retry; everything else surfaces immediately.
pub fn is_transient(error: &Error) -> bool {
    match error.root() {
        Error::Reqwest(err) => err.is_timeout() || err.is_connect() || err.is_request(),
        Error::Message(message) => {
            message.contains("Throttling")
                || message.contains("TooManyRequests")
                || message.contains("ServiceUnavailable")
        }
        _ => false,
    }
}
