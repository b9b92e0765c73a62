//! Central event management and broadcasting

use tokio::sync::broadcast;

use crate::events::{CollectionEvent, RuntimeEvent, SessionEvent};
use crate::timer::TimerEvent;

/// Fan-out of every runtime event to any number of subscribers
pub struct EventManager {
    event_tx: broadcast::Sender<RuntimeEvent>,
}

impl EventManager {
    /// Create a new event manager with a broadcast channel
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.event_tx.subscribe()
    }

    pub fn emit_timer(&self, event: TimerEvent) {
        let _ = self.event_tx.send(RuntimeEvent::Timer(event));
    }

    pub fn emit_collection(&self, event: CollectionEvent) {
        tracing::debug!("Broadcasting collection event: {:?}", event.event_type);
        let _ = self.event_tx.send(RuntimeEvent::Collection(event));
    }

    pub fn emit_session(&self, event: SessionEvent) {
        tracing::info!("Broadcasting session event: {:?}", event.event_type);
        let subscriber_count = self.event_tx.receiver_count();
        if let Err(e) = self.event_tx.send(RuntimeEvent::Session(event)) {
            tracing::warn!(
                "Session event dropped, {} subscribers: {:?}",
                subscriber_count,
                e
            );
        }
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_manager_creation() {
        let manager = EventManager::new();
        let _receiver = manager.subscribe();
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let manager = EventManager::new();
        let mut receiver1 = manager.subscribe();
        let mut receiver2 = manager.subscribe();

        manager.emit_session(SessionEvent::signed_in("user1".to_string()));

        let received1 = receiver1.recv().await.unwrap();
        let received2 = receiver2.recv().await.unwrap();

        assert!(matches!(received1, RuntimeEvent::Session(_)));
        assert!(matches!(received2, RuntimeEvent::Session(_)));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_harmless() {
        let manager = EventManager::new();
        manager.emit_collection(CollectionEvent::cleared());
        manager.emit_timer(TimerEvent::tick("t1".to_string(), 5));

        let mut receiver = manager.subscribe();
        manager.emit_collection(CollectionEvent::cleared());
        assert!(matches!(
            receiver.recv().await.unwrap(),
            RuntimeEvent::Collection(_)
        ));
    }
}
