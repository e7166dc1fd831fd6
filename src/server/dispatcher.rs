//! Command dispatcher
//!
//! Runs the login state machine and, once logged in, routes each parsed
//! command to its handler. Handlers follow two rules:
//!
//! - leave-before-join: the old membership is released in the same store
//!   transaction that creates the new one;
//! - broadcasts go out only after the change they announce is committed.
//!
//! Client mistakes become one error line; store failures are logged and
//! reported, and the matching in-memory change is skipped.

use std::sync::Arc;

use crate::broadcast::Scope;
use crate::error::Result;
use crate::protocol::{reply, Command};
use crate::registry::RegistryError;
use crate::server::hub::Hub;
use crate::session::{AuthPhase, ConnectionHandle, ConnectionId, SessionState};
use crate::store::{
    CredentialStore, KnockStore, MessageKind, MessageStore, RoomDirectory, DEFAULT_ROOM,
};

/// What the connection loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Dispatcher {
    hub: Arc<Hub>,
    handle: ConnectionHandle,
    state: SessionState,
}

impl Dispatcher {
    pub(crate) fn new(hub: Arc<Hub>, handle: ConnectionHandle, state: SessionState) -> Self {
        Self { hub, handle, state }
    }

    fn id(&self) -> ConnectionId {
        self.state.id
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    pub(crate) fn username(&self) -> Option<&str> {
        self.state.username()
    }

    pub(crate) fn session(&self) -> &SessionState {
        &self.state
    }

    pub(crate) async fn reply(&self, line: &str) -> Result<()> {
        self.handle.send_line(line).await?;
        Ok(())
    }

    async fn reply_all(&self, lines: &[String]) -> Result<()> {
        for line in lines {
            self.reply(line).await?;
        }
        Ok(())
    }

    async fn fail(&self, text: &str) -> Result<Flow> {
        self.reply(&reply::error(text)).await?;
        Ok(Flow::Continue)
    }

    // ------------------------------------------------------------------
    // Login
    // ------------------------------------------------------------------

    /// Handle one line before the session is authenticated
    pub(crate) async fn login(&mut self, line: &str) -> Result<()> {
        match self.state.phase.clone() {
            AuthPhase::AwaitingUsername => match Command::parse(line) {
                Ok(Command::User { username }) => self.begin_login(username).await,
                Err(e) if line.trim_start().starts_with("/user") => {
                    self.reply(&reply::error(e.to_string())).await
                }
                _ => self.reply(&reply::login_required()).await,
            },
            AuthPhase::AwaitingPassword { username, known } => {
                self.finish_login(username, known, line.trim()).await
            }
            AuthPhase::Authenticated { .. } => Ok(()),
        }
    }

    async fn begin_login(&mut self, username: String) -> Result<()> {
        if self.hub.registry().is_online(&username) {
            return self.reply(&reply::username_taken(&username)).await;
        }

        let known = match self.hub.store().user_exists(&username).await {
            Ok(known) => known,
            Err(e) => {
                tracing::error!(user = %username, error = %e, "User lookup failed");
                return self
                    .reply(&reply::error("Login is unavailable right now, try again"))
                    .await;
            }
        };

        let prompt = if known {
            reply::password_prompt(&username)
        } else {
            reply::new_account_prompt(&username)
        };
        self.state.expect_password(username, known);
        self.reply(&prompt).await
    }

    async fn finish_login(&mut self, username: String, known: bool, password: &str) -> Result<()> {
        if password.is_empty() {
            return self.reply(&reply::error("Password cannot be empty")).await;
        }

        let store = self.hub.store();
        let accepted = if known {
            store
                .authenticate(&username, password)
                .await
                .map(|user| user.is_some())
        } else {
            store.create_user(&username, password).await
        };

        match accepted {
            Ok(true) => {}
            Ok(false) => {
                self.state.reject_password();
                tracing::warn!(
                    connection = %self.id(),
                    user = %username,
                    attempts = self.state.failed_attempts,
                    "Login rejected"
                );
                let text = if known {
                    format!("Invalid password for @{username}")
                } else {
                    format!("Username @{username} was just registered by someone else")
                };
                return self.reply(&reply::error(text)).await;
            }
            Err(e) => {
                tracing::error!(user = %username, error = %e, "Credential check failed");
                self.state.reset();
                return self
                    .reply(&reply::error("Login is unavailable right now, try again"))
                    .await;
            }
        }

        let registry = self.hub.registry();
        if let Err(RegistryError::UsernameTaken(_)) =
            registry.register(self.handle.clone(), &username)
        {
            self.state.reset();
            return self.reply(&reply::username_taken(&username)).await;
        }

        // Every login starts in the default room; stale memberships from an
        // unclean shutdown are released by the same transaction.
        match self.hub.store().switch_room(&username, DEFAULT_ROOM, false).await {
            Ok(true) => {}
            result => {
                if let Err(e) = result {
                    tracing::error!(user = %username, error = %e, "Failed to join default room");
                }
                registry.unregister(self.id());
                self.state.reset();
                return self
                    .reply(&reply::error(format!("Could not join [#{DEFAULT_ROOM}], try again")))
                    .await;
            }
        }

        if !self.place(&username, DEFAULT_ROOM).await {
            return Ok(());
        }

        self.state.authenticate();
        tracing::info!(
            connection = %self.id(),
            user = %username,
            peer = ?self.state.peer_addr,
            created = !known,
            failed_attempts = self.state.failed_attempts,
            "User logged in"
        );

        self.reply(&reply::welcome(&username)).await?;
        self.hub
            .broadcast(
                &reply::joined(&username, DEFAULT_ROOM),
                Scope::Room(DEFAULT_ROOM),
                None,
            )
            .await;
        Ok(())
    }

    /// Record the committed room in the registry
    ///
    /// Fails only if this session was torn down concurrently (a peer's
    /// broadcast hit a dead write on us). The membership we just created is
    /// then released again so nothing outlives the session.
    async fn place(&self, username: &str, room: &str) -> bool {
        match self.hub.registry().set_room(username, room) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(user = username, room = room, error = %e, "Session gone mid-command");
                if let Err(e) = self.hub.store().leave_room(username, room).await {
                    tracing::error!(user = username, room = room, error = %e, "Failed to release membership");
                }
                self.handle.close();
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Handle one line from an authenticated session
    pub(crate) async fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let Some(username) = self.username().map(str::to_owned) else {
            return Ok(Flow::Exit);
        };
        let Some(room) = self.hub.registry().current_room(&username) else {
            // Torn down by someone else's failed write
            return Ok(Flow::Exit);
        };

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => return self.fail(&e.to_string()).await,
        };

        tracing::debug!(connection = %self.id(), user = %username, command = ?command, "Command");

        match command {
            Command::User { .. } => {
                self.fail(&format!("You are already logged in as @{username}"))
                    .await
            }
            Command::Send { text } => self.send(&username, &room, &text).await,
            Command::Whisper { target, text } => {
                self.whisper(&username, &room, &target, &text).await
            }
            Command::Rooms => self.rooms().await,
            Command::Room { name, locked } => {
                self.create_room(&username, &room, &name, locked).await
            }
            Command::Enter { name } => self.enter(&username, &room, &name).await,
            Command::Who => {
                let occupants = self.hub.registry().occupants(&room);
                self.reply(&reply::who(&room, &occupants)).await?;
                Ok(Flow::Continue)
            }
            Command::History => self.history(&room).await,
            Command::Knock { name } => self.knock(&username, &room, &name).await,
            Command::Peephole => self.peephole(&username, &room).await,
            Command::Help => {
                self.reply_all(&reply::help()).await?;
                Ok(Flow::Continue)
            }
            Command::Exit => {
                // The session ends either way; a failed goodbye changes nothing
                let _ = self.reply(&reply::system("Goodbye!")).await;
                tracing::info!(connection = %self.id(), user = %username, "User exited");
                Ok(Flow::Exit)
            }
        }
    }

    async fn send(&self, username: &str, room: &str, text: &str) -> Result<Flow> {
        if text.is_empty() {
            return Ok(Flow::Continue);
        }

        match self
            .hub
            .store()
            .save_message(username, room, text, MessageKind::Chat)
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.fail("Message could not be saved").await,
            Err(e) => {
                tracing::error!(user = username, room = room, error = %e, "Failed to save message");
                return self.fail("Message could not be saved").await;
            }
        }

        self.hub
            .broadcast(
                &reply::chat(room, username, text),
                Scope::Room(room),
                Some(self.id()),
            )
            .await;
        Ok(Flow::Continue)
    }

    async fn whisper(&self, username: &str, room: &str, target: &str, text: &str) -> Result<Flow> {
        if text.is_empty() {
            return self.fail("/whisper needs a message").await;
        }
        if target == username {
            return self.fail("You cannot whisper to yourself").await;
        }

        let unresolved = format!("User @{target} could not be resolved.");
        let registry = self.hub.registry();
        if registry.current_room(target).as_deref() != Some(room) {
            return self.fail(&unresolved).await;
        }
        let Some(recipient) = registry.resolve_connection(target) else {
            return self.fail(&unresolved).await;
        };

        match self
            .hub
            .store()
            .save_message(username, room, text, MessageKind::Whisper)
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.fail("Whisper could not be saved").await,
            Err(e) => {
                tracing::error!(user = username, room = room, error = %e, "Failed to save whisper");
                return self.fail("Whisper could not be saved").await;
            }
        }

        if !self
            .hub
            .send_to(&recipient, &reply::whisper(room, username, text))
            .await
        {
            return self.fail(&unresolved).await;
        }

        self.reply(&reply::system(format!("Whispered to @{target}")))
            .await?;
        Ok(Flow::Continue)
    }

    async fn rooms(&self) -> Result<Flow> {
        match self.hub.store().get_all_rooms().await {
            Ok(rooms) => {
                self.reply_all(&reply::room_list(&rooms)).await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list rooms");
                self.fail("Could not list rooms").await
            }
        }
    }

    async fn create_room(
        &self,
        username: &str,
        current: &str,
        name: &str,
        locked: bool,
    ) -> Result<Flow> {
        match self
            .hub
            .store()
            .create_room(name, locked, Some(username))
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.fail(&format!("Room [#{name}] already exists")).await,
            Err(e) => {
                tracing::error!(user = username, room = name, error = %e, "Failed to create room");
                return self.fail(&format!("Could not create [#{name}]")).await;
            }
        }

        let kind = if locked { "locked room" } else { "room" };
        self.reply(&reply::system(format!("Creating {kind} [#{name}]")))
            .await?;
        self.move_to(username, current, name, true).await
    }

    async fn enter(&self, username: &str, current: &str, name: &str) -> Result<Flow> {
        if name == current {
            return self.fail(&format!("You are already in [#{name}]")).await;
        }

        let room = match self.hub.store().get_room_info(name).await {
            Ok(Some(room)) => room,
            Ok(None) => return self.fail(&format!("Room [#{name}] does not exist")).await,
            Err(e) => {
                tracing::error!(room = name, error = %e, "Room lookup failed");
                return self.fail(&format!("Could not enter [#{name}]")).await;
            }
        };

        // No exception for the host
        if room.locked {
            return self
                .fail(&format!(
                    "Room [#{name}] is locked. Use /knock {name} to ask the host"
                ))
                .await;
        }

        self.move_to(username, current, name, room.is_hosted_by(username))
            .await
    }

    /// Leave `from` and join `to`
    async fn move_to(&self, username: &str, from: &str, to: &str, is_host: bool) -> Result<Flow> {
        match self.hub.store().switch_room(username, to, is_host).await {
            Ok(true) => {}
            Ok(false) => return self.fail(&format!("Could not move to [#{to}]")).await,
            Err(e) => {
                tracing::error!(user = username, room = to, error = %e, "Failed to switch room");
                return self.fail(&format!("Could not move to [#{to}]")).await;
            }
        }

        self.hub
            .broadcast(&reply::left(username, from), Scope::Room(from), Some(self.id()))
            .await;

        if !self.place(username, to).await {
            return Ok(Flow::Exit);
        }

        tracing::info!(user = username, from = from, to = to, host = is_host, "User moved");
        self.hub
            .broadcast(&reply::joined(username, to), Scope::Room(to), None)
            .await;
        Ok(Flow::Continue)
    }

    async fn history(&self, room: &str) -> Result<Flow> {
        let limit = self.hub.config().history_limit;
        match self.hub.store().get_history(room, limit).await {
            Ok(messages) => {
                self.reply_all(&reply::history(room, &messages)).await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                tracing::error!(room = room, error = %e, "Failed to load history");
                self.fail("Could not load history").await
            }
        }
    }

    async fn knock(&self, username: &str, current: &str, name: &str) -> Result<Flow> {
        let room = match self.hub.store().get_room_info(name).await {
            Ok(Some(room)) => room,
            Ok(None) => return self.fail(&format!("Room [#{name}] does not exist")).await,
            Err(e) => {
                tracing::error!(room = name, error = %e, "Room lookup failed");
                return self.fail(&format!("Could not knock on [#{name}]")).await;
            }
        };

        if !room.locked {
            self.reply(&reply::system(format!(
                "Room [#{name}] is open. Use /enter {name} instead"
            )))
            .await?;
            return Ok(Flow::Continue);
        }
        if room.is_hosted_by(username) {
            return self.fail("You cannot knock on your own room").await;
        }
        if name == current {
            return self.fail(&format!("You are already in [#{name}]")).await;
        }

        match self.hub.store().save_request(username, name).await {
            Ok(true) => {}
            Ok(false) => return self.fail(&format!("Could not knock on [#{name}]")).await,
            Err(e) => {
                tracing::error!(user = username, room = name, error = %e, "Failed to save knock");
                return self.fail(&format!("Could not knock on [#{name}]")).await;
            }
        }

        self.reply(&reply::system(format!("Invitation sent to [#{name}]")))
            .await?;

        // Let the host know if they are in the room right now
        if let Some(host) = room.creator.as_deref() {
            let registry = self.hub.registry();
            if registry.current_room(host).as_deref() == Some(name) {
                if let Some(handle) = registry.resolve_connection(host) {
                    let notice = reply::system(format!(
                        "@{username} knocked on [#{name}]. Use /peephole to review"
                    ));
                    self.hub.send_to(&handle, &notice).await;
                }
            }
        }

        Ok(Flow::Continue)
    }

    async fn peephole(&self, username: &str, current: &str) -> Result<Flow> {
        let room = match self.hub.store().get_room_info(current).await {
            Ok(Some(room)) => room,
            Ok(None) => return self.fail(&format!("Room [#{current}] does not exist")).await,
            Err(e) => {
                tracing::error!(room = current, error = %e, "Room lookup failed");
                return self.fail("Could not look through the peephole").await;
            }
        };

        if !room.locked {
            return self
                .fail(&format!("[#{current}] is not locked, nobody needs to knock"))
                .await;
        }
        if !room.is_hosted_by(username) {
            return self
                .fail(&format!("Only the host of [#{current}] can use /peephole"))
                .await;
        }

        match self.hub.store().get_requests(current).await {
            Ok(knockers) => {
                self.reply_all(&reply::knocks(current, &knockers)).await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                tracing::error!(room = current, error = %e, "Failed to load knocks");
                self.fail("Could not look through the peephole").await
            }
        }
    }
}
