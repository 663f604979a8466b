use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::StoreError;
use crate::gateway::{PersistenceGateway, RoomFilter, RoomPage};
use crate::messages;
use crate::model::{Message, RoomRecord};
use crate::rooms;

/// Open a single connection and make sure the schema exists.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path.as_ref())
        .with_context(|| format!("opening {}", path.as_ref().display()))?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  description TEXT,
  category TEXT,
  admin TEXT NOT NULL,
  participants TEXT NOT NULL,
  current_participants INTEGER NOT NULL,
  max_participants INTEGER NOT NULL,
  status TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  last_activity INTEGER NOT NULL,
  ended_at INTEGER
);
CREATE INDEX IF NOT EXISTS rooms_status_activity ON rooms(status, last_activity);

CREATE TABLE IF NOT EXISTS messages (
  id TEXT PRIMARY KEY,
  room_id TEXT NOT NULL,
  author TEXT NOT NULL,
  text TEXT NOT NULL,
  type TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  is_deleted INTEGER NOT NULL DEFAULT 0,
  deleted_at INTEGER,
  is_edited INTEGER NOT NULL DEFAULT 0,
  edited_at INTEGER,
  reactions TEXT NOT NULL DEFAULT '{}',
  is_pinned INTEGER NOT NULL DEFAULT 0,
  pinned_by TEXT,
  pinned_at INTEGER
);
CREATE INDEX IF NOT EXISTS messages_room_created ON messages(room_id, created_at);
"#;

/// SQLite-backed [`PersistenceGateway`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(|c| c.execute_batch("PRAGMA busy_timeout = 5000;"));
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .with_context(|| format!("opening database {}", path.as_ref().display()))?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single pooled connection keeps every
    /// caller on the same database.
    pub fn in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }
}

impl PersistenceGateway for SqliteStore {
    fn find_room_by_id(&self, id: &str) -> Result<Option<RoomRecord>, StoreError> {
        rooms::get_room(&*self.conn()?, id)
    }

    fn upsert_room(&self, room: &RoomRecord) -> Result<(), StoreError> {
        rooms::upsert_room(&*self.conn()?, room)
    }

    fn list_active_rooms(&self, limit: usize) -> Result<Vec<RoomRecord>, StoreError> {
        rooms::list_active(&*self.conn()?, limit)
    }

    fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        messages::insert_message(&*self.conn()?, message)
    }

    fn list_recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        messages::list_messages(&*self.conn()?, room_id, None, limit)
    }

    fn search_messages(
        &self,
        room_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        messages::search_messages(&*self.conn()?, room_id, query, limit)
    }

    fn count_messages(&self, room_id: &str, excluding_deleted: bool) -> Result<u64, StoreError> {
        messages::count_messages(&*self.conn()?, room_id, excluding_deleted)
    }

    fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        messages::get_message(&*self.conn()?, id)
    }

    fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        messages::update_message(&*self.conn()?, message)
    }

    fn list_messages_before(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        messages::list_messages(&*self.conn()?, room_id, before, limit)
    }

    fn list_rooms(&self, filter: &RoomFilter) -> Result<RoomPage, StoreError> {
        rooms::list_rooms(&*self.conn()?, filter)
    }

    fn list_categories(&self) -> Result<Vec<String>, StoreError> {
        rooms::list_categories(&*self.conn()?)
    }
}
