use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Message, RoomRecord, RoomStatus};

/// Filter for the paginated room listing.
#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub status: Option<RoomStatus>,
    pub category: Option<String>,
    /// Case-insensitive match against title and description.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomPage {
    pub rooms: Vec<RoomRecord>,
    pub total: u64,
    pub page: usize,
    pub limit: usize,
}

/// Durable store for rooms and messages.
///
/// Calls are blocking; the engine runs them on the blocking pool and never
/// while holding a room lock.
pub trait PersistenceGateway: Send + Sync {
    fn find_room_by_id(&self, id: &str) -> Result<Option<RoomRecord>, StoreError>;

    fn upsert_room(&self, room: &RoomRecord) -> Result<(), StoreError>;

    /// Live rooms, most recently active first.
    fn list_active_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError>;

    fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Newest first.
    fn list_recent_messages(&self, room_id: &str, limit: usize)
        -> Result<Vec<Message>, StoreError>;

    /// Case-insensitive substring match over non-deleted messages, newest first.
    fn search_messages(
        &self,
        room_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    fn count_messages(&self, room_id: &str, excluding_deleted: bool) -> Result<u64, StoreError>;

    fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError>;

    fn update_message(&self, message: &Message) -> Result<(), StoreError>;

    /// History page strictly older than `before` (Unix millis), newest first.
    fn list_messages_before(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    fn list_rooms(&self, filter: &RoomFilter) -> Result<RoomPage, StoreError>;

    fn list_categories(&self) -> Result<Vec<String>, StoreError>;
}
