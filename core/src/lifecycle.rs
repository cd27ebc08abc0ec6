//! Time driven status changes: `scheduled -> live -> finished`.
//!
//! Draft, finished and cancelled events are never touched here; those
//! states only change through an explicit edit.

use crate::event::{EventStatus, UnknownStatus};
use time::{Duration, OffsetDateTime};
use tracing::warn;

pub const DEFAULT_DURATION: Duration = Duration::minutes(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: EventStatus,
    pub to: EventStatus,
}

impl Transition {
    /// An overdue scheduled event finishing in one step, never having been
    /// observed live.
    pub fn skips_live(&self) -> bool {
        self.from == EventStatus::Scheduled && self.to == EventStatus::Finished
    }
}

/// Lifecycle rules for a fixed event duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    duration: Duration,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
        }
    }
}

impl Lifecycle {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// `None` when the end falls outside the representable range; such an
    /// event never ends.
    pub fn ends_at(&self, scheduled_date: OffsetDateTime) -> Option<OffsetDateTime> {
        scheduled_date.checked_add(self.duration)
    }

    /// The status an event should have at `now`.
    ///
    /// A scheduled event whose whole slot already passed goes straight to
    /// finished, so evaluating the result again never moves it further.
    pub fn target(
        &self,
        status: EventStatus,
        scheduled_date: OffsetDateTime,
        now: OffsetDateTime,
    ) -> EventStatus {
        let ended = self.ends_at(scheduled_date).is_some_and(|end| now >= end);
        match status {
            EventStatus::Scheduled if ended => EventStatus::Finished,
            EventStatus::Scheduled if now >= scheduled_date => EventStatus::Live,
            EventStatus::Live if ended => EventStatus::Finished,
            other => other,
        }
    }

    /// `Some` when the event is due for a change.
    pub fn evaluate(
        &self,
        status: EventStatus,
        scheduled_date: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Option<Transition> {
        let to = self.target(status, scheduled_date, now);
        (to != status).then_some(Transition { from: status, to })
    }

    /// Like [`Lifecycle::evaluate`] for a status read from storage. Values
    /// that do not parse are logged and left alone.
    pub fn evaluate_raw(
        &self,
        raw_status: &str,
        scheduled_date: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Option<Transition> {
        match raw_status.parse::<EventStatus>() {
            Ok(status) => self.evaluate(status, scheduled_date, now),
            Err(UnknownStatus(raw)) => {
                warn!(status = %raw, "skipping event with unknown status");
                None
            }
        }
    }
}
