pub use room_api::{Identity, Message, MessageType, Participant, RoomSpec, RoomStatus, RoomView};
use time::OffsetDateTime;

/// Durable room snapshot. Same shape as the client view, without channels.
pub type RoomRecord = RoomView;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
