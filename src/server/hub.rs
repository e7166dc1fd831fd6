//! Shared server state and the single disconnect path
//!
//! A [`Hub`] owns the session registry, the broadcast engine and the store
//! for one server instance. Every connection task holds an `Arc<Hub>`.

use std::sync::Arc;

use crate::broadcast::{BroadcastEngine, Scope};
use crate::protocol::reply;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::session::{ConnectionHandle, ConnectionId};
use crate::store::{RoomDirectory, Store};

/// Lifecycle-scoped state shared by all connections of a server
pub struct Hub {
    registry: Arc<SessionRegistry>,
    broadcaster: BroadcastEngine,
    store: Arc<dyn Store>,
    config: ServerConfig,
}

impl Hub {
    /// Create a hub with an empty registry
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            broadcaster: BroadcastEngine::new(Arc::clone(&registry)),
            registry,
            store,
            config,
        }
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Persistence layer
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Broadcast a line and clean up every target whose write failed
    ///
    /// Returns the number of targets the line reached.
    pub async fn broadcast(
        &self,
        text: &str,
        scope: Scope<'_>,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let delivery = self.broadcaster.deliver(text, scope, exclude).await;
        if !delivery.failed.is_empty() {
            self.reap(delivery.failed).await;
        }
        delivery.delivered
    }

    /// Write one line to a peer's connection
    ///
    /// A failed write disconnects that peer. Returns whether the line was
    /// written.
    pub async fn send_to(&self, target: &ConnectionHandle, text: &str) -> bool {
        match target.send_line(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection = %target.id(), error = %e, "Direct write failed");
                self.reap(vec![target.id()]).await;
                false
            }
        }
    }

    /// Tear down the session on a connection
    ///
    /// Unregisters it, releases its persistent membership, closes its handle
    /// and tells its last room it left. Safe to call any number of times and
    /// from any task; only the first call for a connection does anything.
    /// Returns whether this call performed the cleanup.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        self.reap(vec![id]).await > 0
    }

    /// Work-list cleanup: a departure notice can fail to reach a dead peer,
    /// which queues that peer too.
    async fn reap(&self, mut pending: Vec<ConnectionId>) -> usize {
        let mut cleaned = 0;

        while let Some(id) = pending.pop() {
            let Some(session) = self.registry.unregister(id) else {
                continue;
            };
            session.handle.close();
            cleaned += 1;

            let Some(room) = session.current_room else {
                tracing::info!(connection = %id, user = %session.username, "Session closed before joining a room");
                continue;
            };

            if let Err(e) = self.store.leave_room(&session.username, &room).await {
                tracing::error!(
                    user = %session.username,
                    room = %room,
                    error = %e,
                    "Failed to release membership"
                );
            }

            let delivery = self
                .broadcaster
                .deliver(&reply::departed(&session.username), Scope::Room(&room), None)
                .await;
            pending.extend(delivery.failed);

            tracing::info!(
                connection = %id,
                user = %session.username,
                room = %room,
                "User disconnected"
            );
        }

        cleaned
    }
}
