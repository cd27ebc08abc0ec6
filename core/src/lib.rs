//! Domain rules for scheduled live events and their chat.

pub mod access;
pub mod chat;
pub mod error;
pub mod event;
pub mod humanize;
pub mod lifecycle;
pub mod moderation;
pub mod principal;

pub use chat::{Authored, ChatMessage, MessageState, MessageView};
pub use error::Rejection;
pub use event::{Category, Event, EventStatus, EventUpdate, NewEvent};
pub use lifecycle::{Lifecycle, Transition};
pub use moderation::ModerationFilter;
pub use principal::{Principal, User};
