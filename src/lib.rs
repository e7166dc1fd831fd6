//! spacecat: a line-oriented TCP chat server
//!
//! Clients connect over plain TCP, log in with `/user <name>` followed by a
//! password, and land in the `general` room. From there they can chat, move
//! between rooms, create locked rooms, whisper to room-mates, read history,
//! and knock on locked rooms.
//!
//! # Architecture
//!
//! ```text
//!                           Arc<Hub>
//!          ┌────────────────────────────────────────┐
//!          │ SessionRegistry   (live sessions)      │
//!          │ BroadcastEngine   (fan-out)            │
//!          │ Arc<dyn Store>    (SQLite)             │
//!          └───────────────────┬────────────────────┘
//!                              │
//!       ┌──────────────────────┼──────────────────────┐
//!       ▼                      ▼                      ▼
//!  [Connection]           [Connection]           [Connection]
//!  auth → commands        auth → commands        auth → commands
//!       │
//!       └──► Dispatcher ──► store + registry ──► broadcast ──► TCP
//! ```
//!
//! Every connection is a tokio task running [`server::connection::serve`].
//! Whatever way the task ends, the session is unregistered, its persistent
//! room membership is released and the room is told the user left.

pub mod broadcast;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use server::{ChatServer, ServerConfig};
pub use store::{SqliteStore, Store};
