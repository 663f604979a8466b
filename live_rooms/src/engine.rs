//! Room coordination engine.
//!
//! Resolves each inbound client event against the connection's session,
//! applies it to the owning room and reports failures back to the
//! originating connection. Rooms mutate under their own lock; durable writes
//! go through the outbox and are never awaited by a broadcast.

use std::sync::Arc;
use std::time::Duration;

use room_api::{
    ClientEvent, CreateRoom, DeleteMessage, EditMessage, EndStream, ErrorEvent, MessageHistory,
    PinMessage, ReactMessage, RoomRef, RoomsUpdate, SendMessage, ServerEvent, Typing,
    TypingNotice,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{ClientChannel, ConnId};
use crate::config::RoomSettings;
use crate::error::{RoomError, StoreError};
use crate::fanout::{deliver_all, Audience};
use crate::gateway::PersistenceGateway;
use crate::messages::validate_text;
use crate::model::{now_ms, Identity, Message, MessageType, RoomStatus, RoomView};
use crate::outbox::Outbox;
use crate::registry::RoomRegistry;
use crate::session::SessionTracker;
use crate::typing::TypingTracker;

/// Upper bound on rooms restored from the store at startup.
const HYDRATE_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_participants: usize,
    pub max_message_chars: usize,
    pub history_limit: usize,
    pub rooms_list_limit: usize,
    pub typing_debounce: Duration,
}

impl From<&RoomSettings> for Limits {
    fn from(s: &RoomSettings) -> Self {
        Self {
            max_participants: s.max_participants,
            max_message_chars: s.max_message_chars,
            history_limit: s.history_limit,
            rooms_list_limit: s.rooms_list_limit,
            typing_debounce: Duration::from_millis(s.typing_debounce_ms),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&RoomSettings::default())
    }
}

pub struct ChatEngine {
    registry: RoomRegistry,
    sessions: SessionTracker,
    typing: TypingTracker,
    outbox: Outbox,
    store: Arc<dyn PersistenceGateway>,
    limits: Limits,
}

impl ChatEngine {
    /// Build an engine and start its persistence worker on the current runtime.
    pub fn new(store: Arc<dyn PersistenceGateway>, limits: Limits) -> Self {
        let outbox = Outbox::spawn(store.clone());
        Self {
            registry: RoomRegistry::new(),
            sessions: SessionTracker::new(),
            typing: TypingTracker::new(limits.typing_debounce),
            outbox,
            store,
            limits,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Restore live rooms recorded by a previous run.
    pub async fn hydrate(&self) -> Result<usize, RoomError> {
        let records = self.query(|s| s.list_active_rooms(HYDRATE_LIMIT)).await?;
        let added = self.registry.hydrate(records);
        info!(rooms = added, "restored live rooms");
        Ok(added)
    }

    /// Run a store call on the blocking pool.
    pub async fn query<T, F>(&self, call: F) -> Result<T, RoomError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PersistenceGateway) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(RoomError::from)
    }

    /// Register a new connection and hand back its outbound receiver.
    pub fn connect(&self) -> (ClientChannel, UnboundedReceiver<Arc<ServerEvent>>) {
        let (channel, rx) = ClientChannel::open();
        self.sessions.connect(channel.clone());
        debug!(conn = %channel.conn(), "connected");
        (channel, rx)
    }

    /// Process one inbound event. Failures go back to `conn` as error events.
    pub async fn handle(&self, conn: ConnId, event: ClientEvent) {
        let operation = event.operation();
        debug!(%conn, operation, "client event");
        if let Err(err) = self.dispatch(conn, event).await {
            debug!(%conn, operation, code = err.code(), "rejected: {err}");
            self.report(conn, operation, err.code(), &err.to_string());
        }
    }

    /// Send an error event to one connection.
    pub fn report(&self, conn: ConnId, operation: &str, code: &str, message: &str) {
        if let Some(channel) = self.sessions.channel(conn) {
            channel.deliver(Arc::new(ServerEvent::Error(ErrorEvent {
                operation: operation.to_string(),
                code: code.to_string(),
                message: message.to_string(),
            })));
        }
    }

    async fn dispatch(&self, conn: ConnId, event: ClientEvent) -> Result<(), RoomError> {
        match event {
            ClientEvent::CreateRoom(req) => self.create_room(conn, req).await.map(|_| ()),
            ClientEvent::JoinRoom(req) => self.join_room(conn, req).await.map(|_| ()),
            ClientEvent::SendMessage(req) => self.send_message(conn, req).map(|_| ()),
            ClientEvent::LeaveRoom(req) => self.leave_room(conn, req).map(|_| ()),
            ClientEvent::EndStream(req) => self.end_stream(conn, req).map(|_| ()),
            ClientEvent::GetRooms => {
                self.get_rooms(conn);
                Ok(())
            }
            ClientEvent::Typing(req) => self.typing(conn, req),
            ClientEvent::EditMessage(req) => self.edit_message(conn, req).await.map(|_| ()),
            ClientEvent::DeleteMessage(req) => self.delete_message(conn, req).await.map(|_| ()),
            ClientEvent::ReactMessage(req) => self.react_message(conn, req).await.map(|_| ()),
            ClientEvent::PinMessage(req) => self.pin_message(conn, req).await.map(|_| ()),
        }
    }

    /// The bound identity of a connection wins over whatever the payload claims.
    fn requester(&self, conn: ConnId, claimed: Identity) -> Identity {
        self.sessions.identity(conn).unwrap_or(claimed)
    }

    fn send_to(&self, conn: ConnId, event: ServerEvent) {
        if let Some(channel) = self.sessions.channel(conn) {
            channel.deliver(Arc::new(event));
        }
    }

    fn broadcast_all(&self, event: ServerEvent) {
        deliver_all(self.sessions.channels(), event);
    }

    /// Drop this connection's membership in the room it was bound to before
    /// entering `next`. Only called once `next` has accepted the caller.
    fn leave_previous(&self, conn: ConnId, uid: &str, next: &str) {
        let Some(prev) = self.sessions.get(conn).and_then(|s| s.room_id) else {
            return;
        };
        if prev == next {
            return;
        }
        if let Ok(room) = self.registry.lookup(&prev) {
            if let Err(err) = room.leave_connection(&self.outbox, uid, conn) {
                debug!(room = %prev, "leaving previous room: {err}");
            }
        }
        self.typing.clear(uid, &prev);
        self.sessions.unbind(conn, &prev);
    }

    pub async fn create_room(&self, conn: ConnId, req: CreateRoom) -> Result<RoomView, RoomError> {
        let CreateRoom { room: spec, user } = req;
        let admin = self.requester(conn, user);
        if spec.title.trim().is_empty() {
            return Err(RoomError::BadRequest("room title is required".into()));
        }
        let capacity = spec.max_participants.unwrap_or(self.limits.max_participants);
        if capacity == 0 {
            return Err(RoomError::BadRequest("maxParticipants must be at least 1".into()));
        }
        if let Some(id) = spec.id.clone().filter(|id| !id.trim().is_empty()) {
            if self.registry.contains(&id) {
                return Err(RoomError::AlreadyExists(id));
            }
            let lookup = id.clone();
            if self.query(move |s| s.find_room_by_id(&lookup)).await?.is_some() {
                return Err(RoomError::AlreadyExists(id));
            }
        }

        let channel = self.sessions.channel(conn);
        let room = self.registry.create(&spec, admin.clone(), channel, capacity)?;
        self.leave_previous(conn, &admin.uid, room.id());
        let view = room.announce_created(&self.outbox)?;
        self.sessions.bind(conn, admin, room.id());
        self.broadcast_all(ServerEvent::RoomsUpdated(RoomsUpdate::RoomCreated {
            room: view.clone(),
        }));
        Ok(view)
    }

    /// Join a room and send the caller its recent history.
    ///
    /// History holds only messages stamped before the join. Anything posted
    /// afterwards reaches the caller live, possibly ahead of the history.
    pub async fn join_room(&self, conn: ConnId, req: RoomRef) -> Result<RoomView, RoomError> {
        let RoomRef { room_id, user } = req;
        let identity = self.requester(conn, user);
        let room = self.registry.lookup(&room_id)?;
        let channel = self.sessions.channel(conn);
        let view = room.join(&self.outbox, identity.clone(), channel)?;
        self.leave_previous(conn, &identity.uid, &room_id);
        self.sessions.bind(conn, identity.clone(), &room_id);
        info!(room = %room_id, user = %identity.uid, "joined");

        self.outbox.flush().await;
        let limit = self.limits.history_limit;
        let id = room_id.clone();
        let joined = view.last_activity;
        let mut messages = match self
            .query(move |s| s.list_messages_before(&id, Some(joined), limit))
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                warn!(room = %room_id, "loading history: {err}");
                Vec::new()
            }
        };
        messages.reverse();
        self.send_to(
            conn,
            ServerEvent::MessageHistory(MessageHistory { room_id, messages }),
        );
        Ok(view)
    }

    pub fn send_message(&self, conn: ConnId, req: SendMessage) -> Result<Message, RoomError> {
        let SendMessage {
            room_id,
            text,
            user,
            kind,
        } = req;
        if kind == MessageType::System {
            return Err(RoomError::BadRequest("system messages are server-only".into()));
        }
        let text = validate_text(&text, self.limits.max_message_chars)?;
        let author = self.requester(conn, user);
        let room = self.registry.lookup(&room_id)?;
        let mut message = Message::new(
            Uuid::new_v4().to_string(),
            room_id,
            author,
            text,
            kind,
            now_ms(),
        );
        message.created_at = room.post_message(&self.outbox, message.clone())?.last_activity;
        Ok(message)
    }

    pub fn leave_room(&self, conn: ConnId, req: RoomRef) -> Result<RoomView, RoomError> {
        let RoomRef { room_id, user } = req;
        let identity = self.requester(conn, user);
        let room = self.registry.lookup(&room_id)?;
        let view = room.leave(&self.outbox, &identity.uid)?;
        self.typing.clear(&identity.uid, &room_id);
        self.sessions.unbind(conn, &room_id);
        debug!(room = %room_id, user = %identity.uid, "left");
        Ok(view)
    }

    pub fn end_stream(&self, conn: ConnId, req: EndStream) -> Result<RoomView, RoomError> {
        let EndStream { room_id, user } = req;
        let requester = self
            .sessions
            .identity(conn)
            .or(user)
            .ok_or(RoomError::Unauthorized)?;
        let room = self.registry.lookup(&room_id)?;
        let view = room.end_stream(&self.outbox, &requester.uid)?;
        self.sessions.unbind_room(&room_id);
        self.typing.clear_room(&room_id);
        info!(room = %room_id, "stream ended");
        self.broadcast_all(ServerEvent::RoomsUpdated(RoomsUpdate::RoomDeleted { room_id }));
        Ok(view)
    }

    pub fn get_rooms(&self, conn: ConnId) {
        let rooms = self.registry.active(self.limits.rooms_list_limit);
        self.send_to(
            conn,
            ServerEvent::RoomsUpdated(RoomsUpdate::RoomsList { rooms }),
        );
    }

    pub fn typing(&self, conn: ConnId, req: Typing) -> Result<(), RoomError> {
        let Typing {
            room_id,
            user,
            is_typing,
        } = req;
        let identity = self.requester(conn, user);
        let room = self.registry.lookup(&room_id)?;
        if !room.is_member(&identity.uid) {
            return Err(RoomError::NotAMember(identity.uid));
        }
        if !self.typing.typing(&identity.uid, &room_id, is_typing) {
            return Ok(());
        }
        let uid = identity.uid.clone();
        room.relay(
            &self.outbox,
            &uid,
            Audience::Others(uid.clone()),
            ServerEvent::UserTyping(TypingNotice {
                room_id,
                user: identity,
                is_typing,
            }),
        )?;
        Ok(())
    }

    /// Load a stored message of a room, change it and publish the result.
    ///
    /// Mutations of one room's messages are serialized so concurrent
    /// read-modify-write cycles cannot lose each other's changes.
    async fn mutate_message<F>(
        &self,
        conn: ConnId,
        room_id: &str,
        message_id: &str,
        claimed: Identity,
        change: F,
    ) -> Result<Message, RoomError>
    where
        F: FnOnce(&Identity, &Identity, &mut Message) -> Result<(), RoomError>,
    {
        let actor = self.requester(conn, claimed);
        let room = self.registry.lookup(room_id)?;
        if room.status() != RoomStatus::Live {
            return Err(RoomError::NotLive);
        }
        if !room.is_member(&actor.uid) {
            return Err(RoomError::NotAMember(actor.uid));
        }

        let _edits = room.lock_edits().await;
        self.outbox.flush().await;
        let id = message_id.to_string();
        let mut message = self
            .query(move |s| s.find_message(&id))
            .await?
            .filter(|m| m.room_id == room_id && !m.is_deleted)
            .ok_or_else(|| RoomError::MessageNotFound(message_id.to_string()))?;
        change(&room.admin(), &actor, &mut message)?;
        room.publish_update(&self.outbox, &actor.uid, message.clone())?;
        Ok(message)
    }

    pub async fn edit_message(&self, conn: ConnId, req: EditMessage) -> Result<Message, RoomError> {
        let text = validate_text(&req.text, self.limits.max_message_chars)?;
        self.mutate_message(conn, &req.room_id, &req.message_id, req.user, |_, actor, msg| {
            if msg.author.uid != actor.uid {
                return Err(RoomError::Unauthorized);
            }
            msg.edit(text, now_ms());
            Ok(())
        })
        .await
    }

    pub async fn delete_message(
        &self,
        conn: ConnId,
        req: DeleteMessage,
    ) -> Result<Message, RoomError> {
        self.mutate_message(conn, &req.room_id, &req.message_id, req.user, |admin, actor, msg| {
            if msg.author.uid != actor.uid && admin.uid != actor.uid {
                return Err(RoomError::Unauthorized);
            }
            msg.soft_delete(now_ms());
            Ok(())
        })
        .await
    }

    pub async fn react_message(
        &self,
        conn: ConnId,
        req: ReactMessage,
    ) -> Result<Message, RoomError> {
        let emoji = req.emoji.trim().to_string();
        if emoji.is_empty() {
            return Err(RoomError::BadRequest("emoji is required".into()));
        }
        self.mutate_message(conn, &req.room_id, &req.message_id, req.user, |_, actor, msg| {
            msg.react(&actor.uid, emoji, now_ms());
            Ok(())
        })
        .await
    }

    pub async fn pin_message(&self, conn: ConnId, req: PinMessage) -> Result<Message, RoomError> {
        let pinned = req.pinned;
        self.mutate_message(conn, &req.room_id, &req.message_id, req.user, |admin, actor, msg| {
            if admin.uid != actor.uid {
                return Err(RoomError::Unauthorized);
            }
            msg.set_pinned(pinned, &actor.uid, now_ms());
            Ok(())
        })
        .await
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, conn: ConnId) {
        let Some(session) = self.sessions.disconnect(conn) else {
            return;
        };
        debug!(%conn, "disconnected");
        let (Some(room_id), Some(identity)) = (session.room_id, session.identity) else {
            return;
        };
        self.typing.clear(&identity.uid, &room_id);
        let Ok(room) = self.registry.lookup(&room_id) else {
            return;
        };
        match room.leave_connection(&self.outbox, &identity.uid, conn) {
            Ok(_) | Err(RoomError::NotLive) => {}
            Err(err) => warn!(room = %room_id, "disconnect cleanup: {err}"),
        }
    }

    /// Evict rooms that ended more than `retention` ago. Returns their ids.
    pub fn evict_ended(&self, retention: Duration, now: i64) -> Vec<String> {
        let cutoff = now - retention.as_millis() as i64;
        let ids = self.registry.ended_before(cutoff);
        for id in &ids {
            self.registry.remove(id);
            self.typing.clear_room(id);
        }
        ids
    }
}
