use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Debounces typing indicators per user and room.
pub struct TypingTracker {
    last: Mutex<HashMap<(String, String), Instant>>,
    debounce: Duration,
}

impl TypingTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            debounce,
        }
    }

    /// Register a typing change. Returns true if it should be relayed.
    ///
    /// A stop is always relayed and clears the debounce window.
    pub fn typing(&self, uid: &str, room_id: &str, is_typing: bool) -> bool {
        let mut guard = self.last.lock();
        let key = (uid.to_string(), room_id.to_string());
        if !is_typing {
            guard.remove(&key);
            return true;
        }
        let now = Instant::now();
        let should = match guard.get(&key) {
            Some(&prev) => now.duration_since(prev) >= self.debounce,
            None => true,
        };
        if should {
            guard.insert(key, now);
        }
        should
    }

    /// Forget one member's entry, e.g. once they leave the room.
    pub fn clear(&self, uid: &str, room_id: &str) {
        self.last
            .lock()
            .remove(&(uid.to_string(), room_id.to_string()));
    }

    /// Forget every entry for a room.
    pub fn clear_room(&self, room_id: &str) {
        self.last.lock().retain(|(_, room), _| room != room_id);
    }
}
