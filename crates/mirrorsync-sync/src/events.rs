//! Broadcast bus for [`SyncEvent`]s
//!
//! Publishing never blocks and never fails. Subscribers that fall behind
//! lose the oldest events and see `RecvError::Lagged`.

use tokio::sync::broadcast;
use tracing::trace;

use mirrorsync_core::ports::SyncEvent;

/// Fan-out channel shared by every session of an orchestrator
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Sends an event to current subscribers, dropping it if there are none
    pub fn publish(&self, event: SyncEvent) {
        trace!(event = event.name(), "Publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;
    use tokio::sync::broadcast::error::RecvError;

    use super::*;

    fn auto_check() -> SyncEvent {
        SyncEvent::AutoCheck {
            source: PathBuf::from("/s"),
            destination: PathBuf::from("/d"),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        bus.publish(auto_check());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();
        bus.publish(auto_check());

        assert_eq!(a.recv().await.unwrap().name(), "sync.autoCheck");
        assert_eq!(b.recv().await.unwrap().name(), "sync.autoCheck");
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(auto_check());
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
    }
}
