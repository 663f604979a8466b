use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::channel::ClientChannel;
use crate::error::RoomError;
use crate::model::{now_ms, Identity, RoomRecord, RoomSpec, RoomStatus};
use crate::room::{Room, RoomState};

/// Room id to room. The map lock only guards the map itself.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live room with `admin` as its only member.
    pub fn create(
        &self,
        spec: &RoomSpec,
        admin: Identity,
        channel: Option<ClientChannel>,
        capacity: usize,
    ) -> Result<Arc<Room>, RoomError> {
        let id = spec
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut rooms = self.rooms.write();
        if rooms.contains_key(&id) {
            return Err(RoomError::AlreadyExists(id));
        }
        let state = RoomState::new(id.clone(), spec, admin, channel, capacity, now_ms());
        let room = Arc::new(Room::new(state));
        rooms.insert(id.clone(), room.clone());
        info!(room = %id, "room created");
        Ok(room)
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Room>, RoomError> {
        self.rooms
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RoomError::RoomNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rooms.read().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Room>> {
        let removed = self.rooms.write().remove(id);
        if removed.is_some() {
            info!(room = %id, "room evicted");
        }
        removed
    }

    /// Live rooms, most recently active first.
    pub fn active(&self, limit: usize) -> Vec<RoomRecord> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().values().cloned().collect();
        let mut live: Vec<RoomRecord> = rooms
            .iter()
            .map(|room| room.view())
            .filter(|view| view.status == RoomStatus::Live)
            .collect();
        live.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        live.truncate(limit);
        live
    }

    /// Re-register live rooms loaded from the store. Rooms already present
    /// are left alone. Returns how many were added.
    pub fn hydrate(&self, records: Vec<RoomRecord>) -> usize {
        let mut rooms = self.rooms.write();
        let mut added = 0;
        for record in records {
            if record.status != RoomStatus::Live || rooms.contains_key(&record.id) {
                continue;
            }
            let id = record.id.clone();
            rooms.insert(id, Arc::new(Room::new(RoomState::from_record(record))));
            added += 1;
        }
        added
    }

    /// Ids of rooms that ended at or before `cutoff`.
    pub fn ended_before(&self, cutoff: i64) -> Vec<String> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().values().cloned().collect();
        rooms
            .iter()
            .filter(|room| matches!(room.ended_at(), Some(at) if at <= cutoff))
            .map(|room| room.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Outbox;

    fn ident(uid: &str) -> Identity {
        Identity {
            uid: uid.into(),
            display_name: uid.into(),
            username: uid.into(),
            avatar: None,
        }
    }

    fn spec(id: Option<&str>) -> RoomSpec {
        RoomSpec {
            id: id.map(str::to_string),
            title: "t".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let registry = RoomRegistry::new();
        registry.create(&spec(Some("r1")), ident("a"), None, 10).unwrap();
        let err = registry
            .create(&spec(Some("r1")), ident("b"), None, 10)
            .err()
            .unwrap();
        assert_eq!(err.code(), "ALREADY_EXISTS");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn generated_ids_are_unique() {
        let registry = RoomRegistry::new();
        let a = registry.create(&spec(None), ident("a"), None, 10).unwrap();
        let b = registry.create(&spec(None), ident("a"), None, 10).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(Uuid::parse_str(a.id()).is_ok());
    }

    #[test]
    fn lookup_unknown_is_not_found() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.lookup("nope").err().unwrap().code(), "ROOM_NOT_FOUND");
    }

    #[test]
    fn ended_rooms_leave_active_view_but_stay_registered() {
        let (outbox, _rx) = Outbox::channel();
        let registry = RoomRegistry::new();
        let room = registry.create(&spec(Some("r1")), ident("a"), None, 10).unwrap();
        registry.create(&spec(Some("r2")), ident("a"), None, 10).unwrap();
        room.end_stream(&outbox, "a").unwrap();

        let active = registry.active(10);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "r2");
        assert!(registry.lookup("r1").is_ok());
        assert_eq!(registry.ended_before(i64::MAX), vec!["r1".to_string()]);
        assert!(registry.ended_before(0).is_empty());
    }

    #[test]
    fn hydrate_skips_ended_and_known_rooms() {
        let registry = RoomRegistry::new();
        let existing = registry.create(&spec(Some("r1")), ident("a"), None, 10).unwrap();
        let mut ended = existing.view();
        ended.id = "r2".into();
        ended.status = RoomStatus::Ended;
        let mut fresh = existing.view();
        fresh.id = "r3".into();

        let added = registry.hydrate(vec![existing.view(), ended, fresh]);
        assert_eq!(added, 1);
        assert!(registry.contains("r3"));
        assert!(!registry.contains("r2"));
    }
}
