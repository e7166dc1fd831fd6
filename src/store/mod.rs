//! Persistence contracts and their SQLite implementation
//!
//! The chat core talks to storage only through the four traits below. Every
//! method is one self-contained transaction; none of them is ever held open
//! across a network wait.
//!
//! Methods return `Ok(false)` / `Ok(None)` for ordinary negative answers
//! (name taken, wrong password, unknown room) and `Err` only when the
//! database itself failed, so callers can tell the two apart and refuse to
//! apply in-memory changes on failure.

pub mod error;
pub mod password;
mod schema;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

pub use error::StoreError;
pub use schema::DEFAULT_ROOM;
pub use sqlite::SqliteStore;

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Row id
    pub id: i64,
    /// Unique username
    pub username: String,
    /// Account creation time
    pub created_at: String,
    /// Previous successful login, if any
    pub last_login: Option<String>,
    /// Whether the account may log in
    pub active: bool,
}

/// A room and its persistent member count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Row id
    pub id: i64,
    /// Unique room name
    pub name: String,
    /// Whether entry requires host admission
    pub locked: bool,
    /// Creator's username; `None` for seeded rooms
    pub creator: Option<String>,
    /// Creation time
    pub created_at: String,
    /// Number of persistent memberships
    pub member_count: i64,
}

impl RoomInfo {
    /// Whether `username` hosts this room
    pub fn is_hosted_by(&self, username: &str) -> bool {
        self.creator.as_deref() == Some(username)
    }
}

/// Kind of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Room chat
    Chat,
    /// Private message between two room-mates
    Whisper,
    /// Server notice
    System,
}

impl MessageKind {
    /// Column value
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Whisper => "whisper",
            MessageKind::System => "system",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(MessageKind::Chat),
            "whisper" => Ok(MessageKind::Whisper),
            "system" => Ok(MessageKind::System),
            other => Err(StoreError::Corrupt(format!("unknown message type {other:?}"))),
        }
    }
}

/// A stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Author's username
    pub username: String,
    /// Message text
    pub content: String,
    /// Message kind
    pub kind: MessageKind,
    /// Time the message was stored
    pub created_at: String,
}

/// User accounts
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether an account with this name exists
    async fn user_exists(&self, username: &str) -> StoreResult<bool>;

    /// Create an account; `Ok(false)` if the name is taken
    async fn create_user(&self, username: &str, password: &str) -> StoreResult<bool>;

    /// Check a password and record the login; `Ok(None)` on mismatch
    async fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<UserInfo>>;
}

/// Rooms and persistent membership
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Look up one room
    async fn get_room_info(&self, name: &str) -> StoreResult<Option<RoomInfo>>;

    /// Every room, oldest first
    async fn get_all_rooms(&self) -> StoreResult<Vec<RoomInfo>>;

    /// Create a room; `Ok(false)` if the name is taken
    async fn create_room(&self, name: &str, locked: bool, creator: Option<&str>)
        -> StoreResult<bool>;

    /// Add a membership; `Ok(false)` if the user or room does not exist
    async fn join_room(&self, username: &str, room: &str, is_host: bool) -> StoreResult<bool>;

    /// Remove a membership; `Ok(false)` if there was none
    async fn leave_room(&self, username: &str, room: &str) -> StoreResult<bool>;

    /// Release every membership of `username` and join `room`, atomically
    ///
    /// `Ok(false)` (and no change) if the user or room does not exist.
    async fn switch_room(&self, username: &str, room: &str, is_host: bool) -> StoreResult<bool>;
}

/// Append-only message history
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message; `Ok(false)` if the user or room does not exist
    async fn save_message(
        &self,
        username: &str,
        room: &str,
        content: &str,
        kind: MessageKind,
    ) -> StoreResult<bool>;

    /// Up to `limit` most recent chat messages of a room, oldest first
    async fn get_history(&self, room: &str, limit: usize) -> StoreResult<Vec<Message>>;
}

/// Knock requests on locked rooms
#[async_trait]
pub trait KnockStore: Send + Sync {
    /// Record a pending request; a repeat while one is pending is a no-op
    ///
    /// `Ok(false)` if the user or room does not exist.
    async fn save_request(&self, username: &str, room: &str) -> StoreResult<bool>;

    /// Usernames with a pending request for a room, in request order
    async fn get_requests(&self, room: &str) -> StoreResult<Vec<String>>;
}

/// Everything the chat core needs from persistence
pub trait Store: CredentialStore + RoomDirectory + MessageStore + KnockStore {}

impl<T> Store for T where T: CredentialStore + RoomDirectory + MessageStore + KnockStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_column_values() {
        for kind in [MessageKind::Chat, MessageKind::Whisper, MessageKind::System] {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
        assert!("shout".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_room_host() {
        let room = RoomInfo {
            id: 2,
            name: "secret".into(),
            locked: true,
            creator: Some("alice".into()),
            created_at: String::new(),
            member_count: 1,
        };
        assert!(room.is_hosted_by("alice"));
        assert!(!room.is_hosted_by("bob"));
    }
}
