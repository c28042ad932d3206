//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::ClawPilotError;

/// Wrap a future with a timeout, or run it unbounded when `duration` is `None`.
pub async fn with_timeout<T>(
    duration: Option<Duration>,
    future: impl Future<Output = Result<T, ClawPilotError>>,
) -> Result<T, ClawPilotError> {
    let Some(duration) = duration else {
        return future.await;
    };
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ClawPilotError::Timeout(duration.as_millis() as u64)),
    }
}
