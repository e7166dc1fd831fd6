//! Per-connection login state machine
//!
//! Tracks a connection from accept to an authenticated session. The
//! transitions are pure; the dispatcher performs the store lookups and feeds
//! the results in.

use std::net::SocketAddr;
use std::time::Instant;

use super::handle::ConnectionId;

/// Login phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    /// Waiting for `/user <name>`
    AwaitingUsername,
    /// Username accepted, next line is the password
    AwaitingPassword {
        /// Requested username
        username: String,
        /// Whether the account already exists (login) or will be created
        known: bool,
    },
    /// Logged in and registered
    Authenticated {
        /// Username of the live session
        username: String,
    },
}

/// Connection-level state owned by the supervisor
#[derive(Debug)]
pub struct SessionState {
    /// Connection id
    pub id: ConnectionId,

    /// Remote peer address, when the transport has one
    pub peer_addr: Option<SocketAddr>,

    /// Current phase
    pub phase: AuthPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Time the session authenticated
    pub authenticated_at: Option<Instant>,

    /// Rejected password attempts so far
    pub failed_attempts: u32,
}

impl SessionState {
    /// Create a new, unauthenticated state
    pub fn new(id: ConnectionId, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer_addr,
            phase: AuthPhase::AwaitingUsername,
            connected_at: Instant::now(),
            authenticated_at: None,
            failed_attempts: 0,
        }
    }

    /// A username was accepted; ask for the password next
    pub fn expect_password(&mut self, username: String, known: bool) {
        if self.phase == AuthPhase::AwaitingUsername {
            self.phase = AuthPhase::AwaitingPassword { username, known };
        }
    }

    /// Password rejected (or account creation lost a race); start over
    pub fn reject_password(&mut self) {
        if matches!(self.phase, AuthPhase::AwaitingPassword { .. }) {
            self.failed_attempts += 1;
            self.phase = AuthPhase::AwaitingUsername;
        }
    }

    /// Back to the username prompt without counting a failure
    pub fn reset(&mut self) {
        if !self.is_authenticated() {
            self.phase = AuthPhase::AwaitingUsername;
        }
    }

    /// Session registered
    pub fn authenticate(&mut self) {
        if let AuthPhase::AwaitingPassword { username, .. } = &self.phase {
            self.phase = AuthPhase::Authenticated {
                username: username.clone(),
            };
            self.authenticated_at = Some(Instant::now());
        }
    }

    /// Whether the session is authenticated
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, AuthPhase::Authenticated { .. })
    }

    /// Username once authenticated
    pub fn username(&self) -> Option<&str> {
        match &self.phase {
            AuthPhase::Authenticated { username } => Some(username),
            _ => None,
        }
    }

    /// Time since accept
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new(ConnectionId(1), None)
    }

    #[test]
    fn test_login_lifecycle() {
        let mut state = state();
        assert_eq!(state.phase, AuthPhase::AwaitingUsername);

        state.expect_password("alice".into(), true);
        assert_eq!(
            state.phase,
            AuthPhase::AwaitingPassword {
                username: "alice".into(),
                known: true
            }
        );

        state.authenticate();
        assert!(state.is_authenticated());
        assert_eq!(state.username(), Some("alice"));
        assert!(state.authenticated_at.is_some());
    }

    #[test]
    fn test_rejected_password_returns_to_username() {
        let mut state = state();
        state.expect_password("bob".into(), true);
        state.reject_password();

        assert_eq!(state.phase, AuthPhase::AwaitingUsername);
        assert_eq!(state.failed_attempts, 1);
        assert_eq!(state.username(), None);
    }

    #[test]
    fn test_authenticate_requires_password_phase() {
        let mut state = state();
        state.authenticate();

        assert!(!state.is_authenticated());
        assert!(state.authenticated_at.is_none());
    }

    #[test]
    fn test_authenticated_state_is_sticky() {
        let mut state = state();
        state.expect_password("carol".into(), false);
        state.authenticate();

        state.expect_password("mallory".into(), true);
        state.reject_password();
        state.reset();

        assert_eq!(state.username(), Some("carol"));
    }
}
