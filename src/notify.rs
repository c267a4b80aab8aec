use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-studio broadcast of committed events. Calendar views subscribe to a
/// studio and revalidate whenever anything on it changes. Lagging receivers
/// drop events rather than backpressure the admission path.
pub struct RevalidateHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for RevalidateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RevalidateHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to commits for a studio. Creates the channel if needed.
    pub fn subscribe(&self, studio_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(studio_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a committed event. No-op if nobody is watching the studio.
    pub fn send(&self, studio_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&studio_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a studio's channel.
    #[allow(dead_code)]
    pub fn remove(&self, studio_id: &Ulid) {
        self.channels.remove(studio_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = RevalidateHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);

        let event = Event::StudioCreated {
            id: sid,
            owner_id: Ulid::new(),
            name: "Studio".into(),
            capacity: 1,
        };
        hub.send(sid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = RevalidateHub::new();
        let sid = Ulid::new();
        hub.send(
            sid,
            &Event::BlockRemoved {
                id: Ulid::new(),
                studio_id: sid,
            },
        );
    }
}
