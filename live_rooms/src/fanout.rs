use std::sync::Arc;

use room_api::ServerEvent;
use tracing::debug;

use crate::channel::ClientChannel;

/// Who in a room receives a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every current member, sender included.
    Everyone,
    /// Every current member except the given uid.
    Others(String),
    /// Only the member with the given uid.
    Member(String),
}

impl Audience {
    pub fn includes(&self, uid: &str) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Others(excluded) => excluded != uid,
            Audience::Member(target) => target == uid,
        }
    }
}

/// One event bound to the recipients resolved when it was produced.
#[derive(Debug)]
pub struct Delivery {
    recipients: Vec<ClientChannel>,
    event: Arc<ServerEvent>,
}

impl Delivery {
    pub fn new(recipients: Vec<ClientChannel>, event: ServerEvent) -> Self {
        Self {
            recipients,
            event: Arc::new(event),
        }
    }

    pub fn event(&self) -> &ServerEvent {
        &self.event
    }

    /// Best-effort, at-most-once delivery. A dead channel never stops the
    /// rest. Returns the number of channels that accepted the event.
    pub fn send(&self) -> usize {
        let mut delivered = 0;
        for channel in &self.recipients {
            if channel.deliver(self.event.clone()) {
                delivered += 1;
            } else {
                debug!(conn = %channel.conn(), event = self.event.name(), "dropped delivery to closed channel");
            }
        }
        delivered
    }
}

/// Deliver one event to an arbitrary set of channels.
pub fn deliver_all(channels: Vec<ClientChannel>, event: ServerEvent) -> usize {
    Delivery::new(channels, event).send()
}
