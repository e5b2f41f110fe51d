//! Clock port
//!
//! Session timestamps and conflict resolution times come from an injected
//! clock so tests can pin them.

use chrono::{DateTime, Utc};

/// Source of the current time
pub trait IClock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation of [`IClock`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl IClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
