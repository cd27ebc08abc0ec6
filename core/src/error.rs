use thiserror::Error;

/// Reasons a request is refused by the domain rules.
///
/// `Display` yields the message shown to end users, `code()` the stable
/// machine-checkable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("The message cannot be empty.")]
    EmptyMessage,
    #[error("The message cannot be longer than {max} characters.")]
    MessageTooLong { max: usize },
    #[error("Offensive language detected, please rephrase your message.")]
    OffensiveLanguage,
    #[error("This event is not live, the chat is closed.")]
    EventNotLive,
    #[error("Event not found.")]
    EventNotFound,
    #[error("Message not found.")]
    MessageNotFound,
    #[error("You do not have permission to {action}.")]
    PermissionDenied { action: &'static str },
    #[error("The scheduled date cannot be in the past.")]
    ScheduledInPast,
    #[error("The date of a live event cannot be changed.")]
    ScheduleLocked,
    #[error("An event cannot go from {from} to {to}.")]
    InvalidTransition { from: String, to: String },
    #[error("Invalid {field}: {reason}.")]
    InvalidField { field: &'static str, reason: String },
    #[error("The event was changed by someone else, reload and try again.")]
    Conflict,
    #[error("You need to sign in first.")]
    Unauthenticated,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::EmptyMessage => "empty_message",
            Rejection::MessageTooLong { .. } => "message_too_long",
            Rejection::OffensiveLanguage => "offensive_language",
            Rejection::EventNotLive => "event_not_live",
            Rejection::EventNotFound => "event_not_found",
            Rejection::MessageNotFound => "message_not_found",
            Rejection::PermissionDenied { .. } => "permission_denied",
            Rejection::ScheduledInPast => "scheduled_in_past",
            Rejection::ScheduleLocked => "schedule_locked",
            Rejection::InvalidTransition { .. } => "invalid_transition",
            Rejection::InvalidField { .. } => "invalid_field",
            Rejection::Conflict => "conflict",
            Rejection::Unauthenticated => "unauthenticated",
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Rejection::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_for_message_rejections() {
        let codes = [
            Rejection::EmptyMessage.code(),
            Rejection::OffensiveLanguage.code(),
            Rejection::EventNotLive.code(),
        ];
        assert_eq!(codes, ["empty_message", "offensive_language", "event_not_live"]);
    }

    #[test]
    fn display_is_human_readable() {
        let r = Rejection::PermissionDenied {
            action: "delete this message",
        };
        assert_eq!(
            r.to_string(),
            "You do not have permission to delete this message."
        );
        assert_eq!(r.code(), "permission_denied");
    }
}
