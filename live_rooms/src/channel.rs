use std::fmt;
use std::sync::Arc;

use room_api::ServerEvent;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Server-side identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound half of a client connection.
///
/// Sending only enqueues; the transport drains the receiver on its own task,
/// so delivery never blocks the caller.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    conn: ConnId,
    tx: UnboundedSender<Arc<ServerEvent>>,
}

impl ClientChannel {
    /// Create a channel for a fresh connection along with its receiving end.
    pub fn open() -> (Self, UnboundedReceiver<Arc<ServerEvent>>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                conn: ConnId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Deliver an event. Returns false if the client is gone.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
