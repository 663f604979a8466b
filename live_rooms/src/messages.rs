use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{RoomError, StoreError};
use crate::model::{Message, MessageType};
use crate::rooms::json_col;

const MESSAGE_COLUMNS: &str = "id, room_id, author, text, type, created_at, is_deleted, deleted_at, is_edited, edited_at, reactions, is_pinned, pinned_by, pinned_at";

/// Trim and bound message text.
pub fn validate_text(text: &str, max_chars: usize) -> Result<String, RoomError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RoomError::Empty);
    }
    if trimmed.chars().count() > max_chars {
        return Err(RoomError::TooLong(max_chars));
    }
    Ok(trimmed.to_string())
}

fn row_to_msg(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        author: json_col(row, 2)?,
        text: row.get(3)?,
        kind: kind
            .parse::<MessageType>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
        created_at: row.get(5)?,
        is_deleted: row.get::<_, i64>(6)? != 0,
        deleted_at: row.get(7)?,
        is_edited: row.get::<_, i64>(8)? != 0,
        edited_at: row.get(9)?,
        reactions: json_col(row, 10)?,
        is_pinned: row.get::<_, i64>(11)? != 0,
        pinned_by: row.get(12)?,
        pinned_at: row.get(13)?,
    })
}

pub fn insert_message(conn: &Connection, msg: &Message) -> Result<(), StoreError> {
    conn.execute(
        &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"),
        params![
            msg.id,
            msg.room_id,
            serde_json::to_string(&msg.author)?,
            msg.text,
            msg.kind.as_str(),
            msg.created_at,
            msg.is_deleted,
            msg.deleted_at,
            msg.is_edited,
            msg.edited_at,
            serde_json::to_string(&msg.reactions)?,
            msg.is_pinned,
            msg.pinned_by,
            msg.pinned_at,
        ],
    )?;
    Ok(())
}

/// Overwrite the mutable fields of a stored message.
pub fn update_message(conn: &Connection, msg: &Message) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE messages SET text = ?2, is_deleted = ?3, deleted_at = ?4, is_edited = ?5, edited_at = ?6,
           reactions = ?7, is_pinned = ?8, pinned_by = ?9, pinned_at = ?10
         WHERE id = ?1",
        params![
            msg.id,
            msg.text,
            msg.is_deleted,
            msg.deleted_at,
            msg.is_edited,
            msg.edited_at,
            serde_json::to_string(&msg.reactions)?,
            msg.is_pinned,
            msg.pinned_by,
            msg.pinned_at,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::Corrupt(format!("message {} not stored", msg.id)));
    }
    Ok(())
}

pub fn get_message(conn: &Connection, id: &str) -> Result<Option<Message>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?;
    Ok(stmt.query_row([id], row_to_msg).optional()?)
}

/// Messages of a room older than `before` (all when `None`), newest first.
pub fn list_messages(
    conn: &Connection,
    room_id: &str,
    before: Option<i64>,
    limit: usize,
) -> Result<Vec<Message>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ?1 AND created_at < ?2 ORDER BY created_at DESC, rowid DESC LIMIT ?3"
    ))?;
    let msgs = stmt
        .query_map(
            params![room_id, before.unwrap_or(i64::MAX), limit as i64],
            row_to_msg,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}

/// Case-insensitive substring search over non-deleted messages.
pub fn search_messages(
    conn: &Connection,
    room_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<Message>, StoreError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ?1 AND is_deleted = 0 AND instr(lower(text), ?2) > 0 ORDER BY created_at DESC, rowid DESC LIMIT ?3"
    ))?;
    let msgs = stmt
        .query_map(params![room_id, needle, limit as i64], row_to_msg)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}

pub fn count_messages(
    conn: &Connection,
    room_id: &str,
    excluding_deleted: bool,
) -> Result<u64, StoreError> {
    let sql = if excluding_deleted {
        "SELECT COUNT(*) FROM messages WHERE room_id = ?1 AND is_deleted = 0"
    } else {
        "SELECT COUNT(*) FROM messages WHERE room_id = ?1"
    };
    let count: i64 = conn.query_row(sql, [room_id], |row| row.get(0))?;
    Ok(count as u64)
}
