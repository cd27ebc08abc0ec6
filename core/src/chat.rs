use crate::{
    access,
    error::Rejection,
    event::{normalize_timestamp, Event, EventStatus},
    humanize,
    moderation::ModerationFilter,
    principal::Principal,
    User,
};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Most recent rows considered by the feed before filtering tombstones.
pub const FETCH_CAP: usize = 100;
/// Messages returned to a polling client by default.
pub const DEFAULT_LIMIT: usize = 50;
pub const ANONYMOUS: &str = "Anonymous";

/// Soft-delete state of a message. A deleted message is kept as a
/// tombstone and never becomes active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MessageState {
    Active,
    Deleted {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub event_id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub state: MessageState,
}

impl ChatMessage {
    /// Build a new message for a live event after moderation.
    pub fn compose(
        event: &Event,
        author: &User,
        raw_text: &str,
        filter: &ModerationFilter,
        now: OffsetDateTime,
    ) -> Result<Self, Rejection> {
        if event.status != EventStatus::Live {
            return Err(Rejection::EventNotLive);
        }
        let text = filter.check(raw_text)?;
        Ok(Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            author_id: author.id,
            text,
            created_at: normalize_timestamp(now),
            state: MessageState::Active,
        })
    }

    pub fn is_visible(&self) -> bool {
        match self.state {
            MessageState::Active => true,
            MessageState::Deleted { .. } => false,
        }
    }

    /// Tombstone the message. Permission is checked on every call; deleting
    /// an already deleted message succeeds without changing it.
    ///
    /// Returns whether the state changed.
    pub fn delete(&mut self, actor: &Principal, now: OffsetDateTime) -> Result<bool, Rejection> {
        if !access::can_delete_message(self, actor) {
            return Err(Rejection::PermissionDenied {
                action: "delete this message",
            });
        }
        match self.state {
            MessageState::Deleted { .. } => Ok(false),
            MessageState::Active => {
                self.state = MessageState::Deleted {
                    at: normalize_timestamp(now),
                };
                Ok(true)
            }
        }
    }
}

/// A message joined with whatever is known about its author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authored {
    pub message: ChatMessage,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl Authored {
    pub fn display_name(&self) -> String {
        resolve_display_name(self.display_name.as_deref(), self.username.as_deref())
    }

    pub fn view(&self, viewer: &Principal, now: OffsetDateTime) -> MessageView {
        MessageView {
            id: self.message.id,
            display_name: self.display_name(),
            message: self.message.text.clone(),
            created_at: humanize::time_ago(self.message.created_at, now),
            can_delete: access::shows_delete_control(&self.message, viewer),
            is_highlighted: false,
        }
    }
}

/// Display name if set, else username, else a placeholder.
pub fn resolve_display_name(display_name: Option<&str>, username: Option<&str>) -> String {
    [display_name, username]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// One row of the polled chat feed, annotated for a specific viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub display_name: String,
    pub message: String,
    pub created_at: String,
    pub can_delete: bool,
    pub is_highlighted: bool,
}

/// Pick the visible part of a newest-first batch: drop tombstones, keep the
/// `limit` most recent and return them oldest first.
pub fn visible_window(newest_first: Vec<Authored>, limit: usize) -> Vec<Authored> {
    let mut window: Vec<Authored> = newest_first
        .into_iter()
        .filter(|a| a.message.is_visible())
        .take(limit)
        .collect();
    window.reverse();
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Category;
    use time::Duration;

    fn user(name: &str, staff: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.into(),
            display_name: String::new(),
            is_staff: staff,
        }
    }

    fn event(status: EventStatus) -> Event {
        let now = OffsetDateTime::now_utc();
        Event {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            category: Category::Music,
            scheduled_date: now,
            status,
            max_viewers: 10,
            is_featured: false,
            tags: String::new(),
            stream_url: "https://example.com".into(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn authored(author: &User, text: &str, offset_secs: i64) -> Authored {
        let base = OffsetDateTime::now_utc();
        Authored {
            message: ChatMessage {
                id: Uuid::new_v4(),
                event_id: Uuid::nil(),
                author_id: author.id,
                text: text.into(),
                created_at: base + Duration::seconds(offset_secs),
                state: MessageState::Active,
            },
            username: Some(author.username.clone()),
            display_name: None,
        }
    }

    #[test]
    fn compose_requires_live_event() {
        let f = ModerationFilter::new(["mierda"]);
        let author = user("ana", false);
        let now = OffsetDateTime::now_utc();
        for status in [
            EventStatus::Draft,
            EventStatus::Scheduled,
            EventStatus::Finished,
            EventStatus::Cancelled,
        ] {
            assert_eq!(
                ChatMessage::compose(&event(status), &author, "hi", &f, now),
                Err(Rejection::EventNotLive)
            );
        }
        let msg = ChatMessage::compose(&event(EventStatus::Live), &author, " hi ", &f, now).unwrap();
        assert_eq!(msg.text, "hi");
        assert!(msg.is_visible());
        assert_eq!(
            ChatMessage::compose(&event(EventStatus::Live), &author, "MIERDA", &f, now),
            Err(Rejection::OffensiveLanguage)
        );
    }

    #[test]
    fn delete_rules() {
        let author = user("ana", false);
        let other = Principal::User(user("bo", false));
        let staff = Principal::User(user("mod", true));
        let now = OffsetDateTime::now_utc();
        let mut msg = authored(&author, "hi", 0).message;

        assert!(matches!(
            msg.delete(&other, now),
            Err(Rejection::PermissionDenied { .. })
        ));
        assert!(msg.is_visible());

        assert_eq!(msg.delete(&staff, now), Ok(true));
        assert!(!msg.is_visible());
        // repeat is a no-op, still permission checked
        assert_eq!(msg.delete(&Principal::User(author), now), Ok(false));
        assert!(msg.delete(&other, now).is_err());
    }

    #[test]
    fn window_skips_tombstones_and_orders_oldest_first() {
        let author = user("ana", false);
        let mut newest_first: Vec<Authored> = (0..6)
            .rev()
            .map(|i| authored(&author, &format!("m{i}"), i))
            .collect();
        // tombstone m4
        newest_first[1].message.state = MessageState::Deleted {
            at: OffsetDateTime::now_utc(),
        };
        let window = visible_window(newest_first, 3);
        let texts: Vec<_> = window.iter().map(|a| a.message.text.as_str()).collect();
        assert_eq!(texts, ["m2", "m3", "m5"]);
    }

    #[test]
    fn display_name_fallbacks() {
        assert_eq!(resolve_display_name(Some("Ana B"), Some("ana")), "Ana B");
        assert_eq!(resolve_display_name(Some(""), Some("ana")), "ana");
        assert_eq!(resolve_display_name(None, None), ANONYMOUS);
    }

    #[test]
    fn view_flags_per_viewer() {
        let author = user("ana", false);
        let a = authored(&author, "hi", 0);
        let now = OffsetDateTime::now_utc();
        assert!(a.view(&Principal::User(author.clone()), now).can_delete);
        assert!(a.view(&Principal::User(user("mod", true)), now).can_delete);
        assert!(!a.view(&Principal::User(user("bo", false)), now).can_delete);
        assert!(!a.view(&Principal::Anonymous, now).can_delete);
        let v = a.view(&Principal::Anonymous, now);
        assert_eq!(v.display_name, "ana");
        assert!(!v.is_highlighted);
    }
}
