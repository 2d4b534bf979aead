//! Exponential backoff for outbound model calls.

use std::future::Future;
use std::time::Duration;

/// Whether a failed call is worth repeating.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Attempt budget and delay growth for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Total attempts, the first call included. Never below 1.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl Backoff {
    #[must_use]
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the budget is spent.
///
/// The last error is returned unchanged. `label` only tags the retry warning.
pub async fn with_retry<T, E, F, Fut>(backoff: &Backoff, label: &str, mut operation: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= backoff.attempts || !error.is_retryable() {
            return Err(error);
        }

        let delay = backoff.delay_after(attempt);
        let delay = delay + jitter(delay / 4);
        tracing::warn!(
            operation = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Clock-derived offset below `max`.
fn jitter(max: Duration) -> Duration {
    let max_nanos = max.as_nanos() as u64;
    if max_nanos == 0 {
        return Duration::ZERO;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    Duration::from_nanos(seed % max_nanos)
}
