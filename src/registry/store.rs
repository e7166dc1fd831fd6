//! Session registry implementation
//!
//! Maps live connections to usernames and usernames to their current room.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::RegistryError;
use crate::session::{ConnectionHandle, ConnectionId};

/// A live, authenticated session
#[derive(Debug, Clone)]
pub struct Session {
    /// Username
    pub username: String,
    /// Room the user is currently in; `None` until the first join commits
    pub current_room: Option<String>,
    /// Write side of the connection
    pub handle: ConnectionHandle,
}

#[derive(Default)]
struct Sessions {
    by_connection: HashMap<ConnectionId, Session>,
    by_username: HashMap<String, ConnectionId>,
}

/// Registry of live sessions
///
/// One `std::sync::Mutex` guards both indexes. Every operation is
/// synchronous and the lock is never held across an `.await`, so callers
/// snapshot what they need and release it before touching the network.
pub struct SessionRegistry {
    inner: Mutex<Sessions>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Sessions::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        // No operation leaves the maps half-updated, so a poisoned lock is
        // still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session for a connection
    ///
    /// Fails if the username already has a live session. The new session has
    /// no room until [`set_room`](Self::set_room) is called.
    pub fn register(
        &self,
        handle: ConnectionHandle,
        username: &str,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.lock();

        if sessions.by_username.contains_key(username) {
            return Err(RegistryError::UsernameTaken(username.to_owned()));
        }

        let id = handle.id();
        sessions.by_username.insert(username.to_owned(), id);
        sessions.by_connection.insert(
            id,
            Session {
                username: username.to_owned(),
                current_room: None,
                handle,
            },
        );

        tracing::debug!(connection = %id, user = username, "Session registered");
        Ok(())
    }

    /// Remove the session bound to a connection
    ///
    /// Returns the removed session, or `None` if the connection was never
    /// registered or has already been removed.
    pub fn unregister(&self, id: ConnectionId) -> Option<Session> {
        let mut sessions = self.lock();
        let session = sessions.by_connection.remove(&id)?;
        sessions.by_username.remove(&session.username);

        tracing::debug!(connection = %id, user = %session.username, "Session unregistered");
        Some(session)
    }

    /// Room a user is currently in
    pub fn current_room(&self, username: &str) -> Option<String> {
        let sessions = self.lock();
        let id = sessions.by_username.get(username)?;
        sessions
            .by_connection
            .get(id)
            .and_then(|s| s.current_room.clone())
    }

    /// Move a live user to a room
    pub fn set_room(&self, username: &str, room: &str) -> Result<(), RegistryError> {
        let mut sessions = self.lock();
        let id = *sessions
            .by_username
            .get(username)
            .ok_or_else(|| RegistryError::NotOnline(username.to_owned()))?;

        let session = sessions
            .by_connection
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotOnline(username.to_owned()))?;
        session.current_room = Some(room.to_owned());
        Ok(())
    }

    /// Handle of a live user's connection
    pub fn resolve_connection(&self, username: &str) -> Option<ConnectionHandle> {
        let sessions = self.lock();
        let id = sessions.by_username.get(username)?;
        sessions.by_connection.get(id).map(|s| s.handle.clone())
    }

    /// Whether a username has a live session
    pub fn is_online(&self, username: &str) -> bool {
        self.lock().by_username.contains_key(username)
    }

    /// Snapshot of broadcast targets
    ///
    /// With `room` set, only sessions currently in that room; otherwise every
    /// session that has a room. `exclude` is skipped.
    pub fn targets(
        &self,
        room: Option<&str>,
        exclude: Option<ConnectionId>,
    ) -> Vec<ConnectionHandle> {
        let sessions = self.lock();
        sessions
            .by_connection
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter(|(_, s)| match (room, s.current_room.as_deref()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(wanted), Some(current)) => wanted == current,
            })
            .map(|(_, s)| s.handle.clone())
            .collect()
    }

    /// Usernames currently in a room, sorted
    pub fn occupants(&self, room: &str) -> Vec<String> {
        let sessions = self.lock();
        let mut names: Vec<String> = sessions
            .by_connection
            .values()
            .filter(|s| s.current_room.as_deref() == Some(room))
            .map(|s| s.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().by_connection.len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
