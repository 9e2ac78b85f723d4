use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub fanning out committed events per salesman. The booking
/// portal and drip tooling subscribe here instead of polling.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for one salesman's calendar. Creates the
    /// channel if needed.
    pub fn subscribe(&self, salesman_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(salesman_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, salesman_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&salesman_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a salesman is deactivated and their
    /// listeners have gone away).
    #[allow(dead_code)]
    pub fn remove(&self, salesman_id: &Ulid) {
        self.channels.remove(salesman_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);

        let event = Event::SlotsExpired {
            salesman: sid,
            slots: vec![Ulid::new()],
        };
        hub.send(sid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        // No subscriber — should not panic
        hub.send(sid, &Event::SalesmanDeactivated { id: sid });
    }

    #[tokio::test]
    async fn channels_are_isolated_per_salesman() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, &Event::SalesmanDeactivated { id: b });
        assert!(rx_a.try_recv().is_err());
    }
}
