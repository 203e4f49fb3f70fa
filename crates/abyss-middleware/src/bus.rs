//! Topic-based publish/subscribe bus between the operator station and its
//! presentation consumers.
//!
//! Built on [`tokio::sync::broadcast`]: every subscriber sees every event on
//! its topic, and a slow subscriber lags instead of blocking the station.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | One snapshot per applied sensor packet |
//! | [`Topic::Imagery`] | Reassembled camera frames |
//! | [`Topic::Terrain`] | Newly accepted terrain points |
//! | [`Topic::Commands`] | Thruster commands the operator sent |
//! | [`Topic::SystemAlerts`] | Link faults and watchdog trips |

use abyss_types::Event;
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per topic before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Imagery,
    Terrain,
    Commands,
    SystemAlerts,
}

/// Shared event bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    imagery: broadcast::Sender<Event>,
    terrain: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus whose topic channels each buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            telemetry: broadcast::channel(capacity).0,
            imagery: broadcast::channel(capacity).0,
            terrain: broadcast::channel(capacity).0,
            commands: broadcast::channel(capacity).0,
            system_alerts: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns how many subscribers were handed the event.  Zero is normal:
    /// the station runs headless when nothing is listening.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        match self.sender(topic).send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(?topic, "no subscribers");
                0
            }
        }
    }

    /// Subscribe to one topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Current subscriber count on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Imagery => &self.imagery,
            Topic::Terrain => &self.terrain,
            Topic::Commands => &self.commands,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// `Err(RecvError::Lagged(n))` means `n` events were dropped because this
    /// subscriber fell behind; receiving may continue.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyss_types::{EventPayload, TerrainPoint, Vec3, ObjectType};
    use std::time::Duration;

    fn make_event() -> Event {
        Event::new(
            "abyss-middleware::test",
            EventPayload::TerrainPoint(TerrainPoint {
                position: Vec3::new(1.0, 2.0, -3.0),
                object_type: ObjectType::Rock,
            }),
        )
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish_to(Topic::Telemetry, make_event()), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::Terrain);
        let mut b = bus.subscribe_to(Topic::Terrain);

        let event = make_event();
        assert_eq!(bus.publish_to(Topic::Terrain, event.clone()), 2);

        assert_eq!(a.recv().await.unwrap().id, event.id);
        assert_eq!(b.recv().await.unwrap().id, event.id);
        assert_eq!(a.topic(), Topic::Terrain);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _telemetry = bus.subscribe_to(Topic::Telemetry);

        bus.publish_to(Topic::Telemetry, make_event());

        let result = tokio::time::timeout(Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "SystemAlerts must not see Telemetry traffic");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Imagery);
        for _ in 0..1_000 {
            bus.publish_to(Topic::Imagery, make_event());
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged, got {result:?}"
        );
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(Topic::Commands), 0);
        let rx = bus.subscribe_to(Topic::Commands);
        assert_eq!(bus.subscriber_count(Topic::Commands), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(Topic::Commands), 0);
    }
}
