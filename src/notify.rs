use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of committed events, one channel per building.
/// Feeds the live event stream that UIs use to refresh slot maps.
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

    /// Subscribe to a building's events. Creates the channel if needed.
    pub fn subscribe(&self, building_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(building_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.building_id()) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a building's channel; open receivers see the stream close.
    pub fn remove(&self, building_id: &Ulid) {
        self.channels.remove(building_id);
    }
}
