use std::collections::HashMap;

use parking_lot::Mutex;

use crate::channel::{ClientChannel, ConnId};
use crate::model::Identity;

/// What the server knows about one live connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub channel: ClientChannel,
    pub identity: Option<Identity>,
    pub room_id: Option<String>,
}

/// Connection to session map. Sessions are never persisted.
#[derive(Default)]
pub struct SessionTracker {
    sessions: Mutex<HashMap<ConnId, Session>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, channel: ClientChannel) {
        self.sessions.lock().insert(
            channel.conn(),
            Session {
                channel,
                identity: None,
                room_id: None,
            },
        );
    }

    /// Bind a connection to an identity and room. Returns the room it was
    /// bound to before, if any.
    pub fn bind(&self, conn: ConnId, identity: Identity, room_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&conn)?;
        session.identity = Some(identity);
        session.room_id.replace(room_id.to_string())
    }

    /// Clear the room binding if it still points at `room_id`.
    pub fn unbind(&self, conn: ConnId, room_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(&conn) {
            if session.room_id.as_deref() == Some(room_id) {
                session.room_id = None;
            }
        }
    }

    /// Clear every binding to `room_id`.
    pub fn unbind_room(&self, room_id: &str) {
        for session in self.sessions.lock().values_mut() {
            if session.room_id.as_deref() == Some(room_id) {
                session.room_id = None;
            }
        }
    }

    pub fn get(&self, conn: ConnId) -> Option<Session> {
        self.sessions.lock().get(&conn).cloned()
    }

    pub fn identity(&self, conn: ConnId) -> Option<Identity> {
        self.sessions.lock().get(&conn).and_then(|s| s.identity.clone())
    }

    pub fn channel(&self, conn: ConnId) -> Option<ClientChannel> {
        self.sessions.lock().get(&conn).map(|s| s.channel.clone())
    }

    /// Channels of every live connection.
    pub fn channels(&self) -> Vec<ClientChannel> {
        self.sessions.lock().values().map(|s| s.channel.clone()).collect()
    }

    /// Remove a session. A second call for the same connection returns None.
    pub fn disconnect(&self, conn: ConnId) -> Option<Session> {
        self.sessions.lock().remove(&conn)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
