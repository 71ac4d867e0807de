//! Bounded retry with exponential backoff for partition writes.
//!
//! ```text
//! Attempt 1: immediate
//! Attempt 2: wait initial_backoff
//! Attempt 3: wait initial_backoff * multiplier
//! ...        capped at max_backoff, at most max_retries extra attempts
//! ```
//!
//! Only transient I/O failures are retried. A missing partition file or a
//! permission problem will not fix itself and fails the flush immediately.

use std::io;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;
use trafficsplit_config::RetryConfig;
use trafficsplit_core::PartitionKey;

use crate::error::{Result, WriterError};
use crate::storage::BatchSink;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: config.multiplier,
        }
    }

    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }
}

/// Failures worth another attempt.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::WriteZero
    )
}

/// Append `lines` to `partition`, retrying transient failures.
///
/// Returns the number of attempts it took.
pub(crate) async fn append_with_retry(
    sink: &dyn BatchSink,
    policy: &RetryPolicy,
    partition: PartitionKey,
    lines: &[String],
) -> Result<u32> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match sink.append(partition, lines).await {
            Ok(()) => return Ok(attempt),
            Err(e) if is_transient(&e) && attempt <= policy.max_retries => {
                let backoff = policy.backoff_for(attempt);
                warn!(
                    partition = %partition,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient write failure, retrying"
                );
                sleep(backoff).await;
            }
            Err(e) => return Err(WriterError::write_failure(partition, attempt, e)),
        }
    }
}
