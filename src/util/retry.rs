//! Retry with exponential backoff and jitter for one-shot gateway requests.

use std::future::Future;
use std::time::Duration;

use crate::error::ClawPilotError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run `operation`, retrying errors that [`ClawPilotError::is_retryable`] accepts.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, ClawPilotError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClawPilotError>>,
    {
        let mut backoff = self.initial_backoff;
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= attempts {
                return Err(err);
            }

            tracing::warn!(
                attempt,
                max_attempts = attempts,
                error = %err,
                "retrying gateway request"
            );

            // 75%-125% of the nominal backoff
            let jitter = 0.75 + jitter_factor() * 0.5;
            tokio::time::sleep(backoff.mul_f64(jitter)).await;
            backoff = backoff.mul_f64(self.multiplier).min(self.max_backoff);
        }
    }
}

/// Pseudo-random factor in [0, 1) derived from the clock.
fn jitter_factor() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 10_000) / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = fast()
            .execute(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClawPilotError::api(503, "warming up"))
                } else {
                    Ok("ok")
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast()
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClawPilotError::Configuration("bad url".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::none()
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClawPilotError::Timeout(10))
            })
            .await;
        assert!(matches!(result, Err(ClawPilotError::Timeout(10))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
