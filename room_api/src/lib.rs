use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Caller-supplied identity. Not verified by the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Lifecycle state of a room.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Live,
    Ended,
    /// Reserved, never entered by the engine.
    Scheduled,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Live => "live",
            RoomStatus::Ended => "ended",
            RoomStatus::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(RoomStatus::Live),
            "ended" => Ok(RoomStatus::Ended),
            "scheduled" => Ok(RoomStatus::Scheduled),
            other => Err(format!("unknown room status {other}")),
        }
    }
}

/// A room member as seen by clients. Channel handles never leave the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(flatten)]
    pub identity: Identity,
    pub joined_at: i64,
}

/// Snapshot of a room. Also the shape persisted as the room record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub admin: Identity,
    pub participants: Vec<Participant>,
    pub current_participants: usize,
    pub max_participants: usize,
    pub status: RoomStatus,
    pub created_at: i64,
    pub last_activity: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
}

/// Requested properties of a new room.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSpec {
    /// Requested identifier; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub max_participants: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub reacted_at: i64,
}

/// A chat message. The author is a snapshot taken at send time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub author: Identity,
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    pub created_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<i64>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at: Option<i64>,
    /// Keyed by the reacting user's uid.
    #[serde(default)]
    pub reactions: BTreeMap<String, Reaction>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub pinned_by: Option<String>,
    #[serde(default)]
    pub pinned_at: Option<i64>,
}

impl Message {
    pub fn new(
        id: String,
        room_id: String,
        author: Identity,
        text: String,
        kind: MessageType,
        now: i64,
    ) -> Self {
        Self {
            id,
            room_id,
            author,
            text,
            kind,
            created_at: now,
            is_deleted: false,
            deleted_at: None,
            is_edited: false,
            edited_at: None,
            reactions: BTreeMap::new(),
            is_pinned: false,
            pinned_by: None,
            pinned_at: None,
        }
    }

    pub fn edit(&mut self, text: String, now: i64) {
        self.text = text;
        self.is_edited = true;
        self.edited_at = Some(now);
    }

    /// Marks the message deleted. The record itself is kept.
    pub fn soft_delete(&mut self, now: i64) {
        if !self.is_deleted {
            self.is_deleted = true;
            self.deleted_at = Some(now);
        }
    }

    /// One reaction per user; reacting again replaces the previous one.
    pub fn react(&mut self, uid: &str, emoji: String, now: i64) {
        self.reactions.insert(
            uid.to_string(),
            Reaction {
                emoji,
                reacted_at: now,
            },
        );
    }

    pub fn set_pinned(&mut self, pinned: bool, by: &str, now: i64) {
        self.is_pinned = pinned;
        if pinned {
            self.pinned_by = Some(by.to_string());
            self.pinned_at = Some(now);
        } else {
            self.pinned_by = None;
            self.pinned_at = None;
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub room: RoomSpec,
    pub user: Identity,
}

/// Payload shared by `joinRoom` and `leaveRoom`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: String,
    pub user: Identity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: String,
    pub text: String,
    pub user: Identity,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndStream {
    pub room_id: String,
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub room_id: String,
    pub user: Identity,
    pub is_typing: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub room_id: String,
    pub message_id: String,
    pub text: String,
    pub user: Identity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub room_id: String,
    pub message_id: String,
    pub user: Identity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactMessage {
    pub room_id: String,
    pub message_id: String,
    pub emoji: String,
    pub user: Identity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PinMessage {
    pub room_id: String,
    pub message_id: String,
    pub pinned: bool,
    pub user: Identity,
}

/// Events a client sends over its connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    CreateRoom(CreateRoom),
    JoinRoom(RoomRef),
    SendMessage(SendMessage),
    LeaveRoom(RoomRef),
    EndStream(EndStream),
    GetRooms,
    Typing(Typing),
    EditMessage(EditMessage),
    DeleteMessage(DeleteMessage),
    ReactMessage(ReactMessage),
    PinMessage(PinMessage),
}

impl ClientEvent {
    /// Wire name of the event, echoed back in error events.
    pub fn operation(&self) -> &'static str {
        match self {
            ClientEvent::CreateRoom(_) => "createRoom",
            ClientEvent::JoinRoom(_) => "joinRoom",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::LeaveRoom(_) => "leaveRoom",
            ClientEvent::EndStream(_) => "endStream",
            ClientEvent::GetRooms => "getRooms",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::EditMessage(_) => "editMessage",
            ClientEvent::DeleteMessage(_) => "deleteMessage",
            ClientEvent::ReactMessage(_) => "reactMessage",
            ClientEvent::PinMessage(_) => "pinMessage",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomsUpdate {
    RoomCreated {
        room: RoomView,
    },
    RoomDeleted {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    RoomsList {
        rooms: Vec<RoomView>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistory {
    pub room_id: String,
    pub messages: Vec<Message>,
}

/// `userJoined` / `userLeft` payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberNotice {
    pub room_id: String,
    pub user: Identity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomEnded {
    pub room_id: String,
    pub ended_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: String,
    pub user: Identity,
    pub is_typing: bool,
}

/// Structured error reported back to the originating connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub operation: String,
    pub code: String,
    pub message: String,
}

/// Events the server delivers to a client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    RoomCreated(RoomView),
    RoomsUpdated(RoomsUpdate),
    RoomUpdated(RoomView),
    MessageHistory(MessageHistory),
    UserJoined(MemberNotice),
    UserLeft(MemberNotice),
    NewMessage(Message),
    MessageUpdated(Message),
    RoomDeleted(RoomEnded),
    UserTyping(TypingNotice),
    Error(ErrorEvent),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomCreated(_) => "roomCreated",
            ServerEvent::RoomsUpdated(_) => "roomsUpdated",
            ServerEvent::RoomUpdated(_) => "roomUpdated",
            ServerEvent::MessageHistory(_) => "messageHistory",
            ServerEvent::UserJoined(_) => "userJoined",
            ServerEvent::UserLeft(_) => "userLeft",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::MessageUpdated(_) => "messageUpdated",
            ServerEvent::RoomDeleted(_) => "roomDeleted",
            ServerEvent::UserTyping(_) => "userTyping",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> Identity {
        Identity {
            uid: "u1".into(),
            display_name: "Alice".into(),
            username: "alice".into(),
            avatar: None,
        }
    }

    #[test]
    fn join_frame_parses() {
        let frame = json!({
            "event": "joinRoom",
            "data": {
                "roomId": "r1",
                "user": {"uid": "u1", "displayName": "Alice", "username": "alice"}
            }
        });
        let ev: ClientEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(
            ev,
            ClientEvent::JoinRoom(RoomRef {
                room_id: "r1".into(),
                user: alice(),
            })
        );
        assert_eq!(ev.operation(), "joinRoom");
    }

    #[test]
    fn get_rooms_needs_no_data() {
        let ev: ClientEvent = serde_json::from_str(r#"{"event":"getRooms"}"#).unwrap();
        assert_eq!(ev, ClientEvent::GetRooms);
    }

    #[test]
    fn send_message_defaults_to_text() {
        let ev: ClientEvent = serde_json::from_value(json!({
            "event": "sendMessage",
            "data": {
                "roomId": "r1",
                "text": "hi",
                "user": {"uid": "u1", "displayName": "Alice", "username": "alice"}
            }
        }))
        .unwrap();
        match ev {
            ClientEvent::SendMessage(m) => assert_eq!(m.kind, MessageType::Text),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rooms_update_carries_type_tag() {
        let ev = ServerEvent::RoomsUpdated(RoomsUpdate::RoomDeleted {
            room_id: "r1".into(),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            v,
            json!({"event": "roomsUpdated", "data": {"type": "roomDeleted", "roomId": "r1"}})
        );
    }

    #[test]
    fn message_serializes_type_field() {
        let msg = Message::new(
            "m1".into(),
            "r1".into(),
            alice(),
            "hi".into(),
            MessageType::Text,
            10,
        );
        let v = serde_json::to_value(ServerEvent::NewMessage(msg)).unwrap();
        assert_eq!(v["event"], "newMessage");
        assert_eq!(v["data"]["type"], "text");
        assert_eq!(v["data"]["roomId"], "r1");
        assert_eq!(v["data"]["author"]["displayName"], "Alice");
    }

    #[test]
    fn reactions_replace_per_user() {
        let mut msg = Message::new(
            "m1".into(),
            "r1".into(),
            alice(),
            "hi".into(),
            MessageType::Text,
            10,
        );
        msg.react("u2", "👍".into(), 11);
        msg.react("u2", "🔥".into(), 12);
        msg.react("u3", "👍".into(), 13);
        assert_eq!(msg.reactions.len(), 2);
        assert_eq!(msg.reactions["u2"].emoji, "🔥");
    }

    #[test]
    fn soft_delete_keeps_first_timestamp() {
        let mut msg = Message::new(
            "m1".into(),
            "r1".into(),
            alice(),
            "hi".into(),
            MessageType::Text,
            10,
        );
        msg.soft_delete(20);
        msg.soft_delete(30);
        assert!(msg.is_deleted);
        assert_eq!(msg.deleted_at, Some(20));
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn unpin_clears_pinner() {
        let mut msg = Message::new(
            "m1".into(),
            "r1".into(),
            alice(),
            "hi".into(),
            MessageType::Text,
            10,
        );
        msg.set_pinned(true, "u1", 15);
        assert_eq!(msg.pinned_by.as_deref(), Some("u1"));
        msg.set_pinned(false, "u1", 16);
        assert!(!msg.is_pinned);
        assert!(msg.pinned_at.is_none());
    }
}
