//! # murmur-store
//!
//! SQLite-backed persistence for conversations, messages and notifications.
//!
//! The delivery core treats storage as an external collaborator; this crate is
//! the reference implementation of that collaborator.  It exposes a
//! synchronous `Database` handle that wraps a `rusqlite::Connection` and
//! provides typed CRUD helpers for every domain model.  Ids and timestamps of
//! messages and notifications are assigned here, which makes the store the
//! ordering authority.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
