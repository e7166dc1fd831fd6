//! Fan-out of one line to a snapshot of live sessions

use std::sync::Arc;

use crate::registry::SessionRegistry;
use crate::session::ConnectionId;

/// Who a broadcast is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// Sessions whose current room is this one
    Room(&'a str),
    /// Every session that is in some room
    Everyone,
}

impl<'a> Scope<'a> {
    fn room(self) -> Option<&'a str> {
        match self {
            Scope::Room(room) => Some(room),
            Scope::Everyone => None,
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Number of targets the line was written to
    pub delivered: usize,
    /// Targets whose write failed; each needs disconnect cleanup
    pub failed: Vec<ConnectionId>,
}

/// Broadcast engine
///
/// Takes the target snapshot under the registry lock, releases it, then
/// writes to each target in turn. A failed write is recorded and delivery
/// continues with the next target. The engine never cleans up on its own;
/// the caller owns the disconnect path.
pub struct BroadcastEngine {
    registry: Arc<SessionRegistry>,
}

impl BroadcastEngine {
    /// Create an engine over a registry
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `text` to every target in `scope` except `exclude`
    pub async fn deliver(
        &self,
        text: &str,
        scope: Scope<'_>,
        exclude: Option<ConnectionId>,
    ) -> Delivery {
        let targets = self.registry.targets(scope.room(), exclude);
        let mut delivery = Delivery::default();

        tracing::debug!(
            scope = ?scope,
            targets = targets.len(),
            "Broadcasting"
        );

        for target in targets {
            match target.send_line(text).await {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection = %target.id(),
                        error = %e,
                        "Broadcast write failed"
                    );
                    delivery.failed.push(target.id());
                }
            }
        }

        delivery
    }
}
