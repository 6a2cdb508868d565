//! Publish/subscribe controllers.
//!
//! The network of a publisher or subscriber is its topic, so routing by
//! network already matches topics.

use cosim_proto::{NetworkEvent, PeerPayload, payloads::pubsub::DataMessageEvent};

use super::{ControllerAction, NetworkContext};

/// Whether the controller publishes or subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubRole {
    /// Sends data on its topic
    Publisher,
    /// Receives data on its topic
    Subscriber,
}

/// A data publisher or subscriber.
#[derive(Debug, Clone)]
pub struct PubSubController {
    topic: String,
    role: PubSubRole,
}

impl PubSubController {
    /// Publisher on `topic`.
    pub fn publisher(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), role: PubSubRole::Publisher }
    }

    /// Subscriber on `topic`.
    pub fn subscriber(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), role: PubSubRole::Subscriber }
    }

    /// Topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Role.
    pub fn role(&self) -> PubSubRole {
        self.role
    }

    /// Publish `data`. Subscribers cannot publish.
    pub fn publish(&self, data: Vec<u8>, ctx: NetworkContext) -> Vec<ControllerAction> {
        if self.role != PubSubRole::Publisher {
            return Vec::new();
        }
        vec![ControllerAction::Broadcast(PeerPayload::Event(NetworkEvent::Data(DataMessageEvent {
            timestamp: ctx.now,
            topic: self.topic.clone(),
            data,
        })))]
    }

    pub(super) fn on_peer(&mut self, payload: &PeerPayload) -> Vec<ControllerAction> {
        match payload {
            PeerPayload::Event(event @ NetworkEvent::Data(e))
                if self.role == PubSubRole::Subscriber && e.topic == self.topic =>
            {
                vec![ControllerAction::Deliver(event.clone())]
            },
            _ => Vec::new(),
        }
    }
}
