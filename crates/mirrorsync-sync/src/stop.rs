//! Session stop signal
//!
//! Combines a session's cancellation token with its optional deadline so
//! the detector and transfer engine can check both at every boundary.

use std::fmt;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a session stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TimedOut,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Cancellation token plus optional deadline
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// A signal that never fires unless its token is cancelled
    pub fn never() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the reason if the session must stop now
    pub fn check(&self) -> Result<(), StopReason> {
        if self.token.is_cancelled() {
            return Err(StopReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StopReason::TimedOut),
            _ => Ok(()),
        }
    }

    /// Resolves when the token is cancelled or the deadline passes
    pub async fn stopped(&self) -> StopReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => StopReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => StopReason::TimedOut,
            },
            None => {
                self.token.cancelled().await;
                StopReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_check_cancelled() {
        let signal = StopSignal::never();
        assert!(signal.check().is_ok());
        signal.token().cancel();
        assert_eq!(signal.check(), Err(StopReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let signal = StopSignal::new(
            CancellationToken::new(),
            Some(Instant::now() + Duration::from_secs(5)),
        );
        assert!(signal.check().is_ok());
        assert_eq!(signal.stopped().await, StopReason::TimedOut);
        assert_eq!(signal.check(), Err(StopReason::TimedOut));
    }

    #[tokio::test]
    async fn test_stopped_on_cancel() {
        let signal = StopSignal::never();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.stopped().await });
        signal.token().cancel();
        assert_eq!(handle.await.unwrap(), StopReason::Cancelled);
    }

    #[test]
    fn test_display() {
        assert_eq!(StopReason::Cancelled.to_string(), "cancelled");
        assert_eq!(StopReason::TimedOut.to_string(), "timed out");
    }
}
