//! Cancellable calls with linear-backoff retry.

use std::future::Future;
use std::time::Duration;

use rf_core::config::GenerationConfig;
use tokio_util::sync::CancellationToken;

/// Attempt budget and backoff for one unit of upstream work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` is followed by a wait of `n * backoff_base`.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff(1),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = rf_core::Result<T>>,
) -> rf_core::Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(rf_core::Error::Cancelled),
        result = fut => result,
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep(cancel: &CancellationToken, duration: Duration) -> rf_core::Result<()> {
    cancellable(cancel, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

/// Call `op(attempt)` until it succeeds, the attempts run out or `cancel`
/// fires. Cancellation is returned immediately and never retried.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> rf_core::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = rf_core::Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match cancellable(cancel, op(attempt)).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::warn!("{what}: giving up after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let wait = policy.backoff(attempt);
                tracing::warn!("{what}: attempt {attempt}/{attempts} failed: {e}; retrying in {wait:?}");
                sleep(cancel, wait).await?;
                attempt += 1;
            }
        }
    }
}
