//! Live events service: persistence, chat services, lifecycle sweep and
//! the HTTP surface over the `stagecore` domain.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod feed;
pub mod messages;
pub mod sweep;
pub mod users;
