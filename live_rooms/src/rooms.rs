use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::gateway::{RoomFilter, RoomPage};
use crate::model::{RoomRecord, RoomStatus};

const ROOM_COLUMNS: &str = "id, title, description, category, admin, participants, current_participants, max_participants, status, created_at, last_activity, ended_at";

/// Decode a JSON text column.
pub(crate) fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_room(row: &Row<'_>) -> rusqlite::Result<RoomRecord> {
    let status: String = row.get(8)?;
    Ok(RoomRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        admin: json_col(row, 4)?,
        participants: json_col(row, 5)?,
        current_participants: row.get::<_, i64>(6)? as usize,
        max_participants: row.get::<_, i64>(7)? as usize,
        status: status
            .parse::<RoomStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into()))?,
        created_at: row.get(9)?,
        last_activity: row.get(10)?,
        ended_at: row.get(11)?,
    })
}

/// Insert or replace the snapshot of a room.
pub fn upsert_room(conn: &Connection, room: &RoomRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO rooms (id, title, description, category, admin, participants, current_participants, max_participants, status, created_at, last_activity, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           category = excluded.category,
           admin = excluded.admin,
           participants = excluded.participants,
           current_participants = excluded.current_participants,
           max_participants = excluded.max_participants,
           status = excluded.status,
           last_activity = excluded.last_activity,
           ended_at = excluded.ended_at",
        params![
            room.id,
            room.title,
            room.description,
            room.category,
            serde_json::to_string(&room.admin)?,
            serde_json::to_string(&room.participants)?,
            room.current_participants as i64,
            room.max_participants as i64,
            room.status.as_str(),
            room.created_at,
            room.last_activity,
            room.ended_at,
        ],
    )?;
    Ok(())
}

pub fn get_room(conn: &Connection, id: &str) -> Result<Option<RoomRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"))?;
    Ok(stmt.query_row([id], row_to_room).optional()?)
}

/// Live rooms, most recently active first.
pub fn list_active(conn: &Connection, limit: usize) -> Result<Vec<RoomRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROOM_COLUMNS} FROM rooms WHERE status = 'live' ORDER BY last_activity DESC LIMIT ?1"
    ))?;
    let rooms = stmt
        .query_map([limit as i64], row_to_room)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rooms)
}

/// Filtered, paginated listing ordered by last activity.
pub fn list_rooms(conn: &Connection, filter: &RoomFilter) -> Result<RoomPage, StoreError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(status) = filter.status {
        params.push(status.as_str().to_string());
        clauses.push(format!("status = ?{}", params.len()));
    }
    if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
        params.push(category.to_string());
        clauses.push(format!("category = ?{}", params.len()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        params.push(search.to_lowercase());
        let n = params.len();
        clauses.push(format!(
            "(instr(lower(title), ?{n}) > 0 OR instr(lower(coalesce(description, '')), ?{n}) > 0)"
        ));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM rooms{where_sql}"),
        rusqlite::params_from_iter(params.iter()),
        |row| row.get(0),
    )?;

    let page = filter.page.max(1);
    let limit = filter.limit.max(1);
    // Pages past what SQLite can address are simply empty.
    let offset = match (page - 1)
        .checked_mul(limit)
        .and_then(|o| i64::try_from(o).ok())
    {
        Some(offset) => offset,
        None => {
            return Ok(RoomPage {
                rooms: Vec::new(),
                total: total as u64,
                page,
                limit,
            })
        }
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROOM_COLUMNS} FROM rooms{where_sql} ORDER BY last_activity DESC LIMIT {limit} OFFSET {offset}"
    ))?;
    let rooms = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), row_to_room)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoomPage {
        rooms,
        total: total as u64,
        page,
        limit,
    })
}

/// Distinct non-empty categories, alphabetical.
pub fn list_categories(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT category FROM rooms WHERE category IS NOT NULL AND category != '' ORDER BY category",
    )?;
    let cats = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(cats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{Identity, Participant};

    fn room(id: &str, title: &str, category: Option<&str>, status: RoomStatus, activity: i64) -> RoomRecord {
        let admin = Identity {
            uid: "a".into(),
            display_name: "A".into(),
            username: "a".into(),
            avatar: Some("http://img/a.png".into()),
        };
        RoomRecord {
            id: id.into(),
            title: title.into(),
            description: Some("late night session".into()),
            category: category.map(str::to_string),
            admin: admin.clone(),
            participants: vec![Participant {
                identity: admin,
                joined_at: 1,
            }],
            current_participants: 1,
            max_participants: 10,
            status,
            created_at: 1,
            last_activity: activity,
            ended_at: None,
        }
    }

    #[test]
    fn upsert_roundtrip_and_update() {
        let conn = db::init_db(":memory:").unwrap();
        let mut r = room("r1", "Jazz", Some("music"), RoomStatus::Live, 5);
        upsert_room(&conn, &r).unwrap();
        assert_eq!(get_room(&conn, "r1").unwrap().unwrap(), r);

        r.status = RoomStatus::Ended;
        r.ended_at = Some(9);
        upsert_room(&conn, &r).unwrap();
        let stored = get_room(&conn, "r1").unwrap().unwrap();
        assert_eq!(stored.status, RoomStatus::Ended);
        assert_eq!(stored.ended_at, Some(9));
        assert!(get_room(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn active_rooms_by_recency() {
        let conn = db::init_db(":memory:").unwrap();
        upsert_room(&conn, &room("old", "a", None, RoomStatus::Live, 1)).unwrap();
        upsert_room(&conn, &room("new", "b", None, RoomStatus::Live, 9)).unwrap();
        upsert_room(&conn, &room("gone", "c", None, RoomStatus::Ended, 20)).unwrap();
        let ids: Vec<String> = list_active(&conn, 10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(list_active(&conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn filtered_pages() {
        let conn = db::init_db(":memory:").unwrap();
        upsert_room(&conn, &room("r1", "Jazz Night", Some("music"), RoomStatus::Live, 3)).unwrap();
        upsert_room(&conn, &room("r2", "Chess", Some("games"), RoomStatus::Live, 2)).unwrap();
        upsert_room(&conn, &room("r3", "Blues", Some("music"), RoomStatus::Ended, 1)).unwrap();

        let page = list_rooms(
            &conn,
            &RoomFilter {
                category: Some("music".into()),
                page: 1,
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.total, 2);

        let page = list_rooms(
            &conn,
            &RoomFilter {
                status: Some(RoomStatus::Live),
                search: Some("JAZZ".into()),
                page: 1,
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.rooms.len(), 1);
        assert_eq!(page.rooms[0].id, "r1");

        let second = list_rooms(
            &conn,
            &RoomFilter {
                page: 2,
                limit: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(second.total, 3);
        assert_eq!(second.rooms.len(), 1);
        assert_eq!(second.rooms[0].id, "r3");

        assert_eq!(list_categories(&conn).unwrap(), vec!["games", "music"]);
    }

    #[test]
    fn huge_page_is_empty() {
        let conn = db::init_db(":memory:").unwrap();
        upsert_room(&conn, &room("r1", "Jazz", None, RoomStatus::Live, 1)).unwrap();
        let page = list_rooms(
            &conn,
            &RoomFilter {
                page: usize::MAX,
                limit: 50,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(page.rooms.is_empty());
        assert_eq!(page.total, 1);
        assert_eq!(page.page, usize::MAX);
    }
}
