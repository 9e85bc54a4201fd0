//! Murmur client core.
//!
//! Keeps a UI's view of conversations, timelines and notifications
//! consistent with the server. [`session::start`] wires the HTTP API, the
//! WebSocket push connection and the read-cursor file into a [`SessionHandle`];
//! the [`Reconciler`] underneath is usable on its own.

pub mod api;
pub mod config;
pub mod conversations;
pub mod cursors;
pub mod error;
pub mod inbox;
pub mod rate_guard;
pub mod reconciler;
pub mod session;
pub mod timeline;
pub mod transport;

pub use api::{ChatApi, HttpChatApi};
pub use config::ClientConfig;
pub use cursors::{FileCursorStore, MemoryCursorStore, ReadCursorStore};
pub use error::{ClientError, Result};
pub use reconciler::{Effect, Reconciler};
pub use session::{SessionCommand, SessionHandle, SessionSnapshot, SessionUpdate};
pub use timeline::{EntryKey, Timeline, TimelineEntry};
pub use transport::{PushConnector, PushLink, WsConnector};
