//! Retry policy for transient upload failures: bounded, linear backoff.

use async_trait::async_trait;
use std::time::Duration;

/// Upper bound on retries per node, whatever the configuration says.
pub const MAX_RETRIES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u8,
    unit: Duration,
}

impl RetryPolicy {
    /// `max_retries` is clamped to [`MAX_RETRIES`].
    pub fn new(max_retries: u8, unit: Duration) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES),
            unit,
        }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    /// Wait before retry number `retry` (1-based): `retry` units.
    pub fn delay_for(&self, retry: u8) -> Duration {
        self.unit * u32::from(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES, Duration::from_secs(1))
    }
}

/// Waits between attempts. Injected so backoff timing can be observed in tests.
#[async_trait]
pub trait Backoff: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBackoff;

#[async_trait]
impl Backoff for TokioBackoff {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
