use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY, one channel per party (requester or
/// provider id). Every committed event is sent to both parties of its booking.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a party's events. Creates the channel if needed.
    pub fn subscribe(&self, party_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(party_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, party_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&party_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose listeners have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Channel name a session LISTENs on for one party.
pub fn channel_name(party_id: Ulid) -> String {
    format!("party_{party_id}")
}

/// Inverse of [`channel_name`].
pub fn parse_channel(name: &str) -> Option<Ulid> {
    name.strip_prefix("party_")
        .and_then(|s| Ulid::from_string(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingStatus, Event};

    fn status_event(id: Ulid, provider_id: Ulid) -> Event {
        Event::StatusChanged {
            id,
            provider_id,
            status: BookingStatus::Accepted,
            at: 1,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let party = Ulid::new();
        let mut rx = hub.subscribe(party);

        let event = status_event(Ulid::new(), party);
        hub.send(party, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let party = Ulid::new();
        hub.send(party, &status_event(Ulid::new(), party));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(Ulid::new());
        drop(hub.subscribe(Ulid::new()));
        assert_eq!(hub.channel_count(), 2);
        hub.prune();
        assert_eq!(hub.channel_count(), 1);
        drop(kept);
    }

    #[test]
    fn channel_names() {
        let id = Ulid::new();
        let name = channel_name(id);
        assert!(name.starts_with("party_"));
        assert_eq!(parse_channel(&name), Some(id));
        assert_eq!(parse_channel("resource_x"), None);
        assert_eq!(parse_channel("party_notaulid"), None);
    }
}
