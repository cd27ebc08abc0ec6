use crate::{
    db::{self, from_ts, to_ts},
    error::Result,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use stagecore::{
    access, Category, Event, EventStatus, EventUpdate, NewEvent, Principal, Rejection, User,
};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

pub const PAGE_SIZE: u32 = 12;

const COLUMNS: &str = "id, creator_id, title, description, category, scheduled_at, status, \
     max_viewers, is_featured, tags, stream_url, created_at, updated_at, version";

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: db::parse_uuid(&row.get::<_, String>(0)?)?,
        creator_id: db::parse_uuid(&row.get::<_, String>(1)?)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: row
            .get::<_, String>(4)?
            .parse::<Category>()
            .map_err(|e| conversion_error(4, e))?,
        scheduled_date: from_ts(row.get(5)?)?,
        status: row
            .get::<_, String>(6)?
            .parse::<EventStatus>()
            .map_err(|e| conversion_error(6, e))?,
        max_viewers: row.get(7)?,
        is_featured: row.get::<_, i64>(8)? != 0,
        tags: row.get(9)?,
        stream_url: row.get(10)?,
        created_at: from_ts(row.get(11)?)?,
        updated_at: from_ts(row.get(12)?)?,
        version: row.get(13)?,
    })
}

pub fn insert_event(conn: &Connection, ev: &Event) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO events ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"),
        params![
            ev.id.to_string(),
            ev.creator_id.to_string(),
            ev.title,
            ev.description,
            ev.category.as_str(),
            to_ts(ev.scheduled_date),
            ev.status.as_str(),
            ev.max_viewers,
            ev.is_featured,
            ev.tags,
            ev.stream_url,
            to_ts(ev.created_at),
            to_ts(ev.updated_at),
            ev.version,
        ],
    )?;
    Ok(())
}

pub fn get_event(conn: &Connection, id: &Uuid) -> Result<Option<Event>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM events WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_event).optional()?)
}

fn require_event(conn: &Connection, id: &Uuid) -> Result<Event> {
    get_event(conn, id)?.ok_or_else(|| Rejection::EventNotFound.into())
}

/// Validate and store a new event owned by `creator`.
pub fn create_event(
    conn: &Connection,
    new: NewEvent,
    creator: &User,
    now: OffsetDateTime,
) -> Result<Event> {
    let ev = new.into_event(creator, now)?;
    insert_event(conn, &ev)?;
    info!(event = %ev.id, title = %ev.title, "event created");
    Ok(ev)
}

/// Apply a user edit. The write only lands if nobody else changed the event
/// since it was read; otherwise the caller gets a conflict.
pub fn update_event(
    conn: &Connection,
    id: &Uuid,
    update: EventUpdate,
    actor: &Principal,
    now: OffsetDateTime,
) -> Result<Event> {
    let current = require_event(conn, id)?;
    let mut next = current.apply(update, actor, now)?;
    next.version = current.version + 1;
    let changed = conn.execute(
        "UPDATE events SET title = ?3, description = ?4, category = ?5, scheduled_at = ?6, \
         status = ?7, max_viewers = ?8, tags = ?9, stream_url = ?10, updated_at = ?11, \
         version = version + 1 WHERE id = ?1 AND version = ?2",
        params![
            id.to_string(),
            current.version,
            next.title,
            next.description,
            next.category.as_str(),
            to_ts(next.scheduled_date),
            next.status.as_str(),
            next.max_viewers,
            next.tags,
            next.stream_url,
            to_ts(next.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(Rejection::Conflict.into());
    }
    if next.status != current.status {
        info!(event = %id, from = %current.status, to = %next.status, "status changed by creator");
    }
    Ok(next)
}

/// Compare-and-set a status change made by the lifecycle sweep. Returns
/// false when the event no longer has status `from` or was edited since
/// `version` was read.
pub fn transition_status(
    conn: &Connection,
    id: &Uuid,
    from: EventStatus,
    to: EventStatus,
    version: i64,
    now: OffsetDateTime,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE events SET status = ?3, updated_at = ?4, version = version + 1 \
         WHERE id = ?1 AND status = ?2 AND version = ?5",
        params![id.to_string(), from.as_str(), to.as_str(), to_ts(now), version],
    )?;
    Ok(changed == 1)
}

/// Hard delete an event and its chat history.
pub fn delete_event(conn: &mut Connection, id: &Uuid, actor: &Principal) -> Result<()> {
    let ev = require_event(conn, id)?;
    if !access::can_delete_event(&ev, actor) {
        return Err(Rejection::PermissionDenied {
            action: "delete this event",
        }
        .into());
    }
    let tx = conn.transaction()?;
    let removed = tx.execute(
        "DELETE FROM chat_messages WHERE event_id = ?1",
        [id.to_string()],
    )?;
    tx.execute("DELETE FROM events WHERE id = ?1", [id.to_string()])?;
    tx.commit()?;
    info!(event = %id, messages = removed, "event deleted");
    Ok(())
}

/// Listing filters; empty values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub page: u32,
    pub num_pages: u32,
    pub total: u64,
    pub has_next: bool,
}

/// Search, filter and paginate events, newest schedule first. Out of range
/// pages are clamped.
pub fn list_events(conn: &Connection, filter: &EventFilter) -> Result<EventPage> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        args.push(term.to_lowercase());
        clauses.push(
            "(instr(lower(title), ?1) > 0 OR instr(lower(description), ?1) > 0 OR instr(lower(tags), ?1) > 0)",
        );
    }
    if let Some(category) = filter.category {
        args.push(category.as_str().to_string());
        clauses.push("category = ?");
    }
    if let Some(status) = filter.status {
        args.push(status.as_str().to_string());
        clauses.push("status = ?");
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: u64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM events{where_sql}"),
        rusqlite::params_from_iter(args.iter()),
        |row| row.get(0),
    )?;
    let num_pages = (total.div_ceil(PAGE_SIZE as u64) as u32).max(1);
    let page = filter.page.unwrap_or(1).clamp(1, num_pages);
    let offset = (page - 1) * PAGE_SIZE;

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM events{where_sql} ORDER BY scheduled_at DESC, rowid DESC LIMIT {PAGE_SIZE} OFFSET {offset}"
    ))?;
    let events = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EventPage {
        events,
        page,
        num_pages,
        total,
        has_next: page < num_pages,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatorSummary {
    pub events: Vec<Event>,
    pub total: u64,
    pub live: u64,
    pub scheduled: u64,
}

/// Events owned by `creator_id`, optionally restricted to one status,
/// with per-status counts over the returned set.
pub fn creator_events(
    conn: &Connection,
    creator_id: &Uuid,
    status: Option<EventStatus>,
) -> Result<CreatorSummary> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM events WHERE creator_id = ?1 AND (?2 IS NULL OR status = ?2) \
         ORDER BY scheduled_at DESC, rowid DESC"
    ))?;
    let events = stmt
        .query_map(
            params![creator_id.to_string(), status.map(|s| s.as_str())],
            row_to_event,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let count = |s: EventStatus| events.iter().filter(|e| e.status == s).count() as u64;
    Ok(CreatorSummary {
        total: events.len() as u64,
        live: count(EventStatus::Live),
        scheduled: count(EventStatus::Scheduled),
        events,
    })
}

pub fn events_in_category(conn: &Connection, category: Category) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM events WHERE category = ?1 ORDER BY scheduled_at DESC, rowid DESC"
    ))?;
    let events = stmt
        .query_map([category.as_str()], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}
