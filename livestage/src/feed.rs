//! Read model served to polling chat clients.

use crate::{
    db::DbPool,
    error::{Error, Result},
    events, messages,
};
use rusqlite::Connection;
use serde::Serialize;
use stagecore::{
    chat::{self, FETCH_CAP},
    MessageView, Principal, Rejection,
};
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

/// Body of `GET /events/{id}/messages`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Feed {
    pub messages: Vec<MessageView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Visible messages of an event for `viewer`, oldest first. `None` when the
/// event does not exist.
pub fn list_visible_messages(
    conn: &Connection,
    event_id: &Uuid,
    viewer: &Principal,
    limit: usize,
    now: OffsetDateTime,
) -> Result<Option<Vec<MessageView>>> {
    if events::get_event(conn, event_id)?.is_none() {
        return Ok(None);
    }
    let recent = messages::recent_messages(conn, event_id, FETCH_CAP)?;
    let views = chat::visible_window(recent, limit)
        .iter()
        .map(|a| a.view(viewer, now))
        .collect();
    Ok(Some(views))
}

/// Load the feed without ever failing: a missing event yields an empty list
/// with an error note, a storage fault a single system notice.
pub fn load(
    pool: &DbPool,
    raw_event_id: &str,
    viewer: &Principal,
    limit: usize,
    now: OffsetDateTime,
) -> Feed {
    let not_found = || Feed {
        messages: Vec::new(),
        error: Some(Rejection::EventNotFound.to_string()),
    };
    let Ok(event_id) = Uuid::parse_str(raw_event_id) else {
        return not_found();
    };
    let limit = limit.clamp(1, FETCH_CAP);
    let result = pool
        .get()
        .map_err(Error::from)
        .and_then(|conn| list_visible_messages(&conn, &event_id, viewer, limit, now));
    match result {
        Ok(Some(messages)) => Feed {
            messages,
            error: None,
        },
        Ok(None) => not_found(),
        Err(e) => {
            error!(event = %event_id, error = %e, "chat feed unavailable");
            Feed {
                messages: vec![system_notice()],
                error: Some("The chat is temporarily unavailable.".into()),
            }
        }
    }
}

fn system_notice() -> MessageView {
    MessageView {
        id: Uuid::nil(),
        display_name: "System".into(),
        message: "The chat will be back in a moment.".into(),
        created_at: "just now".into(),
        can_delete: false,
        is_highlighted: true,
    }
}
