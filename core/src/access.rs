//! Who may do what. Every predicate is pure and answers `false` for
//! anonymous callers.

use crate::{chat::ChatMessage, event::Event, principal::Principal};

pub fn can_edit_event(event: &Event, actor: &Principal) -> bool {
    actor.id() == Some(event.creator_id)
}

pub fn can_delete_event(event: &Event, actor: &Principal) -> bool {
    can_edit_event(event, actor)
}

/// The lifecycle sweep does not go through this check.
pub fn can_change_status(event: &Event, actor: &Principal) -> bool {
    actor.id() == Some(event.creator_id)
}

pub fn can_delete_message(message: &ChatMessage, actor: &Principal) -> bool {
    match actor {
        Principal::User(user) => user.id == message.author_id || user.is_staff,
        Principal::Anonymous => false,
    }
}

/// Whether the feed should offer a delete control for `message` to `viewer`.
pub fn shows_delete_control(message: &ChatMessage, viewer: &Principal) -> bool {
    message.is_visible() && can_delete_message(message, viewer)
}
