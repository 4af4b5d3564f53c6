//! Fan-out of ride and driver state changes to subscribed connections.
//!
//! Publish is fire-and-forget: a slow or disconnected subscriber never
//! blocks or fails the publisher. Each topic is backed by its own
//! `tokio::sync::broadcast` channel, so per-topic delivery order follows
//! publish order; a subscriber that falls more than [`CHANNEL_CAPACITY`]
//! events behind loses the oldest ones (drop-oldest semantics).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::geo::Location;
use crate::registry::DriverId;
use crate::ride::{RideId, RideStatus};

/// Per-topic channel capacity before lagging subscribers start losing
/// their oldest events.
pub const CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel key: one ride or one driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Ride(RideId),
    Driver(DriverId),
}

/// State-change event fanned out to subscribers.
///
/// The excluded realtime transport serializes these for the wire; the
/// serde shape here matches the reference payloads
/// (`{driverId, location}`, `{rideId, status}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BroadcastEvent {
    #[serde(rename_all = "camelCase")]
    DriverLocationUpdate {
        driver_id: DriverId,
        location: Location,
    },
    #[serde(rename_all = "camelCase")]
    RideStatusChange { ride_id: RideId, status: RideStatus },
}

impl BroadcastEvent {
    /// The topic this event naturally belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            BroadcastEvent::DriverLocationUpdate { driver_id, .. } => {
                Topic::Driver(driver_id.clone())
            }
            BroadcastEvent::RideStatusChange { ride_id, .. } => Topic::Ride(*ride_id),
        }
    }
}

/// A live subscription to one topic.
///
/// Events accumulate from the moment of subscription; dropping the handle
/// (or calling [`unsubscribe`](Self::unsubscribe)) releases it.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<BroadcastEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next event. Returns `None` once the topic is closed
    /// and all buffered events are drained. A lagged subscriber skips the
    /// overwritten events and keeps reading from the oldest retained one.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(topic = ?self.topic, missed, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(topic = ?self.topic, missed, "subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Explicitly release the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}

/// Topic-keyed event fan-out.
#[derive(Debug, Default)]
pub struct EventBroadcaster {
    topics: RwLock<HashMap<Topic, broadcast::Sender<BroadcastEvent>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a ride or driver topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let mut topics = self.topics.write();
        let sender = topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Subscription {
            receiver: sender.subscribe(),
            topic,
        }
    }

    /// Publish an event to its own topic.
    pub fn publish(&self, event: BroadcastEvent) {
        let topic = event.topic();
        self.publish_to(&topic, event);
    }

    /// Publish an event to an explicit topic.
    ///
    /// Used for cross-posting, e.g. a driver location ping mirrored onto
    /// the topic of the ride that driver is serving. Never blocks; with no
    /// live subscribers the event is discarded and the idle channel pruned.
    pub fn publish_to(&self, topic: &Topic, event: BroadcastEvent) {
        let mut topics = self.topics.write();
        let all_receivers_gone = match topics.get(topic) {
            None => {
                trace!(?topic, "no subscribers, event discarded");
                return;
            }
            Some(sender) => sender.send(event).is_err(),
        };
        if all_receivers_gone {
            topics.remove(topic);
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }
}
