use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use banya_shared::DomainEvent;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 100;

/// Fan-out hub for push updates. One global channel for dashboards, plus a
/// lazily created channel per lane so a kiosk only sees its own traffic.
/// Sends are best-effort; a send with no subscribers is not an error.
#[derive(Clone)]
pub struct Broadcaster {
    global: broadcast::Sender<DomainEvent>,
    lanes: Arc<RwLock<HashMap<String, broadcast::Sender<DomainEvent>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global,
            lanes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn lane_sender(&self, lane: &str) -> broadcast::Sender<DomainEvent> {
        if let Some(tx) = self.lanes.read().expect("lane map poisoned").get(lane) {
            return tx.clone();
        }
        let mut lanes = self.lanes.write().expect("lane map poisoned");
        lanes
            .entry(lane.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<DomainEvent> {
        self.global.subscribe()
    }

    pub fn subscribe_lane(&self, lane: &str) -> broadcast::Receiver<DomainEvent> {
        self.lane_sender(lane).subscribe()
    }

    /// Publish after commit only; listeners treat every event as a fact.
    pub fn publish(&self, event: DomainEvent) {
        let lane = match &event {
            DomainEvent::SessionUpdated { lane, .. }
            | DomainEvent::RegisterSessionUpdated { lane, .. } => Some(lane.clone()),
            DomainEvent::CheckoutRequested { lane, .. } => lane.clone(),
            _ => None,
        };

        if let Some(lane) = lane {
            let _ = self.lane_sender(&lane).send(event.clone());
        }
        let _ = self.global.send(event);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_lane_events_reach_lane_subscribers() {
        let hub = Broadcaster::new();
        let mut lane_rx = hub.subscribe_lane("lane-1");
        let mut other_rx = hub.subscribe_lane("lane-2");
        let mut global_rx = hub.subscribe_global();

        let session_id = Uuid::new_v4();
        hub.publish(DomainEvent::SessionUpdated {
            lane: "lane-1".to_string(),
            session_id,
        });

        match lane_rx.recv().await.unwrap() {
            DomainEvent::SessionUpdated { lane, .. } => assert_eq!(lane, "lane-1"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(global_rx.recv().await.is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let hub = Broadcaster::new();
        hub.publish(DomainEvent::InventoryUpdated {
            at: chrono::Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_global_only_events_skip_lane_channels() {
        let hub = Broadcaster::new();
        let mut lane_rx = hub.subscribe_lane("lane-1");
        let mut global_rx = hub.subscribe_global();

        hub.publish(DomainEvent::WaitlistUpdated {
            entry_id: Uuid::new_v4(),
            status: "ACTIVE".to_string(),
            reason: None,
        });

        assert!(global_rx.recv().await.is_ok());
        assert!(lane_rx.try_recv().is_err());
    }
}
