//! Retry with exponential backoff
//!
//! Transient I/O failures (interrupted, timed out, would-block) are retried
//! with delays of `base * 2^attempt`, capped at `max`.

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use tracing::{info, warn};

use mirrorsync_core::config::RetryConfig;

/// Backoff schedule for retrying transient errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Determines whether an error is transient (retryable)
///
/// Looks for a `std::io::Error` anywhere in the chain whose kind is
/// interrupted, timed out or would-block.
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .map(|io| {
                matches!(
                    io.kind(),
                    ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
                )
            })
            .unwrap_or(false)
    })
}

/// Executes an async operation, retrying transient errors
///
/// Non-transient errors are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation_name: &str, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries && is_transient_error(&err) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::Context;

    use super::*;

    fn io_err(kind: ErrorKind) -> anyhow::Error {
        anyhow::Error::from(std::io::Error::new(kind, "test"))
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(1), Duration::from_millis(400));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
        assert_eq!(policy.delay(3), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_is_transient_error() {
        assert!(is_transient_error(&io_err(ErrorKind::Interrupted)));
        assert!(is_transient_error(&io_err(ErrorKind::TimedOut)));
        assert!(is_transient_error(&io_err(ErrorKind::WouldBlock)));
        assert!(!is_transient_error(&io_err(ErrorKind::NotFound)));
        assert!(!is_transient_error(&anyhow::anyhow!("timeout in text only")));
    }

    #[test]
    fn test_is_transient_error_through_context() {
        let err = Err::<(), _>(std::io::Error::new(ErrorKind::Interrupted, "x"))
            .context("reading chunk")
            .unwrap_err();
        assert!(is_transient_error(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let result = with_retry(&policy, "flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(io_err(ErrorKind::Interrupted))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let result: anyhow::Result<()> = with_retry(&policy, "always", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io_err(ErrorKind::TimedOut))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: anyhow::Result<()> = with_retry(&RetryPolicy::default(), "perm", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io_err(ErrorKind::PermissionDenied))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retries_policy() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = with_retry(&RetryPolicy::none(), "none", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(io_err(ErrorKind::Interrupted))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
