use crate::{
    db::{self, from_ts, to_ts},
    error::Result,
    events,
};
use rusqlite::{params, Connection, OptionalExtension};
use stagecore::{Authored, ChatMessage, MessageState, ModerationFilter, Principal, Rejection, User};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

const COLUMNS: &str = "m.id, m.event_id, m.author_id, m.text, m.created_at, m.is_deleted, m.deleted_at";

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let created_at = from_ts(row.get(4)?)?;
    let state = if row.get::<_, i64>(5)? != 0 {
        let at = match row.get::<_, Option<i64>>(6)? {
            Some(ts) => from_ts(ts)?,
            None => created_at,
        };
        MessageState::Deleted { at }
    } else {
        MessageState::Active
    };
    Ok(ChatMessage {
        id: db::parse_uuid(&row.get::<_, String>(0)?)?,
        event_id: db::parse_uuid(&row.get::<_, String>(1)?)?,
        author_id: db::parse_uuid(&row.get::<_, String>(2)?)?,
        text: row.get(3)?,
        created_at,
        state,
    })
}

pub fn insert_message(conn: &Connection, msg: &ChatMessage) -> Result<()> {
    let deleted_at = match msg.state {
        MessageState::Active => None,
        MessageState::Deleted { at } => Some(to_ts(at)),
    };
    conn.execute(
        "INSERT INTO chat_messages (id, event_id, author_id, text, created_at, is_deleted, deleted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            msg.id.to_string(),
            msg.event_id.to_string(),
            msg.author_id.to_string(),
            msg.text,
            to_ts(msg.created_at),
            deleted_at.is_some(),
            deleted_at,
        ],
    )?;
    Ok(())
}

pub fn get_message(conn: &Connection, id: &Uuid) -> Result<Option<ChatMessage>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM chat_messages m WHERE m.id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_msg).optional()?)
}

/// The newest `cap` messages of an event, tombstones included, newest first,
/// joined with their authors' names.
pub fn recent_messages(conn: &Connection, event_id: &Uuid, cap: usize) -> Result<Vec<Authored>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS}, u.username, u.display_name FROM chat_messages m \
         LEFT JOIN users u ON u.id = m.author_id \
         WHERE m.event_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![event_id.to_string(), cap as i64], |row| {
            Ok(Authored {
                message: row_to_msg(row)?,
                username: row.get(7)?,
                display_name: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stored messages for an event, tombstones included.
pub fn count_for_event(conn: &Connection, event_id: &Uuid) -> Result<u64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM chat_messages WHERE event_id = ?1",
        [event_id.to_string()],
        |row| row.get(0),
    )?)
}

/// Moderate and store a message for a live event.
pub fn post_message(
    conn: &Connection,
    filter: &ModerationFilter,
    event_id: &Uuid,
    author: &User,
    raw_text: &str,
    now: OffsetDateTime,
) -> Result<ChatMessage> {
    let event = events::get_event(conn, event_id)?.ok_or(Rejection::EventNotFound)?;
    let msg = ChatMessage::compose(&event, author, raw_text, filter, now)?;
    insert_message(conn, &msg)?;
    debug!(event = %event_id, message = %msg.id, "message posted");
    Ok(msg)
}

/// Soft delete a message. Permission is re-checked on every call and
/// deleting a tombstone again is a successful no-op.
pub fn delete_message(
    conn: &Connection,
    message_id: &Uuid,
    actor: &Principal,
    now: OffsetDateTime,
) -> Result<ChatMessage> {
    let mut msg = get_message(conn, message_id)?.ok_or(Rejection::MessageNotFound)?;
    if msg.delete(actor, now)? {
        if let MessageState::Deleted { at } = msg.state {
            conn.execute(
                "UPDATE chat_messages SET is_deleted = 1, deleted_at = ?2 WHERE id = ?1 AND is_deleted = 0",
                params![message_id.to_string(), to_ts(at)],
            )?;
        }
        info!(message = %message_id, by = ?actor.id(), "message deleted");
    }
    Ok(msg)
}
