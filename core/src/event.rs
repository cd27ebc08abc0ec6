use crate::{access, error::Rejection, principal::Principal, User};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, ops::RangeInclusive, str::FromStr};
use thiserror::Error;
use time::{macros::datetime, Duration, OffsetDateTime, UtcOffset};
use url::Url;
use uuid::Uuid;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_TAGS_CHARS: usize = 255;
pub const MAX_STREAM_URL_CHARS: usize = 500;
pub const VIEWER_RANGE: RangeInclusive<u32> = 1..=1000;
pub const DEFAULT_MAX_VIEWERS: u32 = 100;
/// Schedules must start before this instant, which keeps end-time
/// arithmetic far from the calendar limits.
pub const LATEST_SCHEDULE: OffsetDateTime = datetime!(9000-01-01 0:00 UTC);

static YOUTUBE_ID: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"youtube\.com/watch\?v=([^&]+)",
        r"youtu\.be/([^?]+)",
        r"youtube\.com/embed/([^?]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Gaming,
    Music,
    Technology,
    Education,
    Art,
    Talk,
    Sports,
    Entertainment,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Gaming,
        Category::Music,
        Category::Technology,
        Category::Education,
        Category::Art,
        Category::Talk,
        Category::Sports,
        Category::Entertainment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Gaming => "gaming",
            Category::Music => "music",
            Category::Technology => "technology",
            Category::Education => "education",
            Category::Art => "art",
            Category::Talk => "talk",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
        }
    }

    /// Human label used by listings.
    pub fn label(self) -> &'static str {
        match self {
            Category::Gaming => "Gaming",
            Category::Music => "Music",
            Category::Technology => "Technology",
            Category::Education => "Education",
            Category::Art => "Art",
            Category::Talk => "Talk",
            Category::Sports => "Sports",
            Category::Entertainment => "Entertainment",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Rejection::invalid("category", format!("unknown category '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Scheduled,
    Live,
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event status '{0}'")]
pub struct UnknownStatus(pub String);

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        EventStatus::Draft,
        EventStatus::Scheduled,
        EventStatus::Live,
        EventStatus::Finished,
        EventStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Scheduled => "scheduled",
            EventStatus::Live => "live",
            EventStatus::Finished => "finished",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a manual edit may move an event from `self` to `next`.
    ///
    /// Keeping the current status is always allowed.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::*;
        self == next
            || matches!(
                (self, next),
                (Draft, Scheduled)
                    | (Draft, Cancelled)
                    | (Scheduled, Live)
                    | (Scheduled, Cancelled)
                    | (Live, Finished)
            )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Drop sub-second precision and normalise to UTC; the store keeps whole seconds.
pub fn normalize_timestamp(t: OffsetDateTime) -> OffsetDateTime {
    let t = t.to_offset(UtcOffset::UTC);
    t - Duration::nanoseconds(t.nanosecond() as i64)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_date: OffsetDateTime,
    pub status: EventStatus,
    pub max_viewers: u32,
    pub is_featured: bool,
    pub tags: String,
    pub stream_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

impl Event {
    /// Comma separated tags, trimmed, blanks dropped.
    pub fn tags_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    /// Embeddable player URL for YouTube and Twitch streams; other URLs pass through.
    pub fn embed_url(&self) -> String {
        let url = self.stream_url.as_str();
        if url.is_empty() {
            return String::new();
        }
        if url.contains("youtube.com") || url.contains("youtu.be") {
            if let Some(id) = YOUTUBE_ID
                .iter()
                .find_map(|re| re.captures(url).and_then(|c| c.get(1)))
            {
                return format!("https://www.youtube.com/embed/{}", id.as_str());
            }
        } else if url.contains("twitch.tv") {
            return url.replace("twitch.tv/", "twitch.tv/embed/");
        }
        url.to_string()
    }

    pub fn is_upcoming(&self, now: OffsetDateTime) -> bool {
        self.status == EventStatus::Scheduled && self.scheduled_date > now
    }

    pub fn is_live(&self) -> bool {
        self.status == EventStatus::Live
    }

    /// Produce the edited event, enforcing ownership, the allowed status
    /// transitions and the schedule lock of live events.
    pub fn apply(
        &self,
        update: EventUpdate,
        actor: &Principal,
        now: OffsetDateTime,
    ) -> Result<Event, Rejection> {
        if !access::can_edit_event(self, actor) {
            return Err(Rejection::PermissionDenied {
                action: "edit this event",
            });
        }
        if update.version.is_some_and(|v| v != self.version) {
            return Err(Rejection::Conflict);
        }
        let mut next = self.clone();
        if let Some(date) = update.scheduled_date.map(normalize_timestamp) {
            if date != self.scheduled_date {
                if self.status == EventStatus::Live {
                    return Err(Rejection::ScheduleLocked);
                }
                if date < normalize_timestamp(now) {
                    return Err(Rejection::ScheduledInPast);
                }
                next.scheduled_date = date;
            }
        }
        if let Some(status) = update.status {
            if status != self.status {
                if !access::can_change_status(self, actor) {
                    return Err(Rejection::PermissionDenied {
                        action: "change the status of this event",
                    });
                }
                if !self.status.can_transition_to(status) {
                    return Err(Rejection::InvalidTransition {
                        from: self.status.to_string(),
                        to: status.to_string(),
                    });
                }
                next.status = status;
            }
        }
        if let Some(title) = update.title {
            next.title = title.trim().to_string();
        }
        if let Some(description) = update.description {
            next.description = description.trim().to_string();
        }
        if let Some(category) = update.category {
            next.category = category;
        }
        if let Some(max_viewers) = update.max_viewers {
            next.max_viewers = max_viewers;
        }
        if let Some(tags) = update.tags {
            next.tags = tags.trim().to_string();
        }
        if let Some(url) = update.stream_url {
            next.stream_url = url.trim().to_string();
        }
        validate_fields(&next)?;
        next.updated_at = normalize_timestamp(now);
        Ok(next)
    }
}

fn default_max_viewers() -> u32 {
    DEFAULT_MAX_VIEWERS
}

/// Payload for creating an event.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_date: OffsetDateTime,
    #[serde(default = "default_max_viewers")]
    pub max_viewers: u32,
    #[serde(default)]
    pub tags: String,
    pub stream_url: String,
    /// Only `draft` or `scheduled`; defaults to `scheduled`.
    #[serde(default)]
    pub status: Option<EventStatus>,
}

impl NewEvent {
    pub fn into_event(self, creator: &User, now: OffsetDateTime) -> Result<Event, Rejection> {
        let scheduled_date = normalize_timestamp(self.scheduled_date);
        if self.scheduled_date < now {
            return Err(Rejection::ScheduledInPast);
        }
        let status = match self.status.unwrap_or(EventStatus::Scheduled) {
            s @ (EventStatus::Draft | EventStatus::Scheduled) => s,
            other => {
                return Err(Rejection::invalid(
                    "status",
                    format!("a new event cannot start as {other}"),
                ))
            }
        };
        let now = normalize_timestamp(now);
        let event = Event {
            id: Uuid::new_v4(),
            creator_id: creator.id,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            category: self.category,
            scheduled_date,
            status,
            max_viewers: self.max_viewers,
            is_featured: false,
            tags: self.tags.trim().to_string(),
            stream_url: self.stream_url.trim().to_string(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        validate_fields(&event)?;
        Ok(event)
    }
}

/// Partial edit of an event. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub scheduled_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub max_viewers: Option<u32>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    /// Version the client last saw.
    #[serde(default)]
    pub version: Option<i64>,
}

fn validate_fields(event: &Event) -> Result<(), Rejection> {
    if event.title.is_empty() {
        return Err(Rejection::invalid("title", "it cannot be empty"));
    }
    if event.title.chars().count() > MAX_TITLE_CHARS {
        return Err(Rejection::invalid(
            "title",
            format!("at most {MAX_TITLE_CHARS} characters"),
        ));
    }
    if event.description.is_empty() {
        return Err(Rejection::invalid("description", "it cannot be empty"));
    }
    if event.scheduled_date >= LATEST_SCHEDULE {
        return Err(Rejection::invalid(
            "scheduled_date",
            format!("must be before {}", LATEST_SCHEDULE.year()),
        ));
    }
    if !VIEWER_RANGE.contains(&event.max_viewers) {
        return Err(Rejection::invalid(
            "max_viewers",
            format!(
                "must be between {} and {}",
                VIEWER_RANGE.start(),
                VIEWER_RANGE.end()
            ),
        ));
    }
    if event.tags.chars().count() > MAX_TAGS_CHARS {
        return Err(Rejection::invalid(
            "tags",
            format!("at most {MAX_TAGS_CHARS} characters"),
        ));
    }
    validate_stream_url(&event.stream_url)
}

fn validate_stream_url(raw: &str) -> Result<(), Rejection> {
    if raw.chars().count() > MAX_STREAM_URL_CHARS {
        return Err(Rejection::invalid(
            "stream_url",
            format!("at most {MAX_STREAM_URL_CHARS} characters"),
        ));
    }
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(Rejection::invalid("stream_url", "expected an http(s) URL")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creator() -> User {
        User {
            id: Uuid::new_v4(),
            username: "host".into(),
            display_name: "Host".into(),
            is_staff: false,
        }
    }

    fn draft(at: OffsetDateTime) -> NewEvent {
        NewEvent {
            title: "Speedrun night".into(),
            description: "Any% attempts".into(),
            category: Category::Gaming,
            scheduled_date: at,
            max_viewers: 100,
            tags: "speedrun, retro, ".into(),
            stream_url: "https://www.twitch.tv/host".into(),
            status: None,
        }
    }

    #[test]
    fn new_event_defaults_to_scheduled() {
        let now = OffsetDateTime::now_utc();
        let ev = draft(now + Duration::hours(1))
            .into_event(&creator(), now)
            .unwrap();
        assert_eq!(ev.status, EventStatus::Scheduled);
        assert_eq!(ev.version, 0);
        assert_eq!(ev.tags_list(), vec!["speedrun", "retro"]);
    }

    #[test]
    fn past_date_rejected_at_creation() {
        let now = OffsetDateTime::now_utc();
        let err = draft(now - Duration::seconds(1))
            .into_event(&creator(), now)
            .unwrap_err();
        assert_eq!(err, Rejection::ScheduledInPast);
    }

    #[test]
    fn new_event_cannot_start_live() {
        let now = OffsetDateTime::now_utc();
        let mut d = draft(now + Duration::hours(1));
        d.status = Some(EventStatus::Live);
        assert_eq!(
            d.into_event(&creator(), now).unwrap_err().code(),
            "invalid_field"
        );
    }

    #[test]
    fn field_limits() {
        let now = OffsetDateTime::now_utc();
        let mut d = draft(now + Duration::hours(1));
        d.max_viewers = 0;
        assert!(d.clone().into_event(&creator(), now).is_err());
        d.max_viewers = 1001;
        assert!(d.clone().into_event(&creator(), now).is_err());
        d.max_viewers = 1000;
        d.stream_url = "ftp://example.com/stream".into();
        assert!(d.clone().into_event(&creator(), now).is_err());
        d.stream_url = "https://example.com/stream".into();
        d.title = "   ".into();
        assert!(d.into_event(&creator(), now).is_err());
    }

    #[test]
    fn transitions() {
        use EventStatus::*;
        assert!(Scheduled.can_transition_to(Live));
        assert!(Live.can_transition_to(Finished));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Live.can_transition_to(Live));
        assert!(!Live.can_transition_to(Scheduled));
        assert!(!Live.can_transition_to(Cancelled));
        assert!(!Finished.can_transition_to(Live));
        assert!(!Cancelled.can_transition_to(Scheduled));
    }

    #[test]
    fn live_event_date_is_locked_even_with_other_changes() {
        let now = OffsetDateTime::now_utc();
        let host = creator();
        let mut ev = draft(now + Duration::hours(1)).into_event(&host, now).unwrap();
        ev.status = EventStatus::Live;
        let update = EventUpdate {
            title: Some("Renamed".into()),
            scheduled_date: Some(ev.scheduled_date + Duration::hours(2)),
            ..Default::default()
        };
        let err = ev
            .apply(update, &Principal::User(host.clone()), now)
            .unwrap_err();
        assert_eq!(err, Rejection::ScheduleLocked);

        // resubmitting the same date is not a change
        let same = EventUpdate {
            title: Some("Renamed".into()),
            scheduled_date: Some(ev.scheduled_date),
            ..Default::default()
        };
        let edited = ev.apply(same, &Principal::User(host), now).unwrap();
        assert_eq!(edited.title, "Renamed");
    }

    #[test]
    fn far_future_dates_rejected() {
        let now = OffsetDateTime::now_utc();
        let host = creator();
        let err = draft(datetime!(9999-12-31 23:30 UTC))
            .into_event(&host, now)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_field");

        let ev = draft(now + Duration::hours(1)).into_event(&host, now).unwrap();
        let update = EventUpdate {
            scheduled_date: Some(LATEST_SCHEDULE),
            ..Default::default()
        };
        let err = ev.apply(update, &Principal::User(host), now).unwrap_err();
        assert_eq!(err.code(), "invalid_field");
    }

    #[test]
    fn reschedule_into_past_rejected() {
        let now = OffsetDateTime::now_utc();
        let host = creator();
        let ev = draft(now + Duration::hours(1)).into_event(&host, now).unwrap();
        let update = EventUpdate {
            scheduled_date: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        let err = ev.apply(update, &Principal::User(host), now).unwrap_err();
        assert_eq!(err, Rejection::ScheduledInPast);
    }

    #[test]
    fn only_creator_edits() {
        let now = OffsetDateTime::now_utc();
        let ev = draft(now + Duration::hours(1))
            .into_event(&creator(), now)
            .unwrap();
        let mut staff = creator();
        staff.is_staff = true;
        let update = EventUpdate {
            status: Some(EventStatus::Live),
            ..Default::default()
        };
        assert!(matches!(
            ev.apply(update.clone(), &Principal::User(staff), now),
            Err(Rejection::PermissionDenied { .. })
        ));
        assert!(matches!(
            ev.apply(update, &Principal::Anonymous, now),
            Err(Rejection::PermissionDenied { .. })
        ));
    }

    #[test]
    fn stale_version_conflicts() {
        let now = OffsetDateTime::now_utc();
        let host = creator();
        let ev = draft(now + Duration::hours(1)).into_event(&host, now).unwrap();
        let update = EventUpdate {
            title: Some("x".into()),
            version: Some(ev.version + 1),
            ..Default::default()
        };
        assert_eq!(
            ev.apply(update, &Principal::User(host), now).unwrap_err(),
            Rejection::Conflict
        );
    }

    #[test]
    fn embed_urls() {
        let now = OffsetDateTime::now_utc();
        let mut ev = draft(now + Duration::hours(1))
            .into_event(&creator(), now)
            .unwrap();
        assert_eq!(ev.embed_url(), "https://www.twitch.tv/embed/host");
        ev.stream_url = "https://www.youtube.com/watch?v=abc123&t=10".into();
        assert_eq!(ev.embed_url(), "https://www.youtube.com/embed/abc123");
        ev.stream_url = "https://youtu.be/xyz?si=1".into();
        assert_eq!(ev.embed_url(), "https://www.youtube.com/embed/xyz");
        ev.stream_url = "https://example.com/live".into();
        assert_eq!(ev.embed_url(), "https://example.com/live");
    }

    #[test]
    fn status_parse_roundtrip_and_unknown() {
        assert_eq!("live".parse::<EventStatus>().unwrap(), EventStatus::Live);
        assert!("paused".parse::<EventStatus>().is_err());
        assert!("sports".parse::<Category>().is_ok());
        assert!("cooking".parse::<Category>().is_err());
    }
}
