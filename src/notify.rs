use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per area. The
/// notification-delivery system subscribes here; the engine only publishes.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for an area. Creates the channel if needed.
    pub fn subscribe(&self, area_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(area_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, area_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&area_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when an area is removed).
    pub fn remove(&self, area_id: &Ulid) {
        self.channels.remove(area_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
