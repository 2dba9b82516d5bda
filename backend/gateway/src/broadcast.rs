//! Broadcast Engine.
//!
//! Every publish fetches the event's full history from the store and pushes
//! it, encoded once, to each registered subscriber. Full snapshots cost
//! O(history) per subscriber per message; in exchange a client only ever
//! needs the last frame it received to be in sync.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use eventchat_core::{ChatError, EventId, MessageStore, UserId};
use eventchat_logging::{ChatEvent, ChatEventLogger};

use crate::protocol::{self, OutboundFrame};
use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Outcome of one fan-out round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers removed from the registry because their connection was dead.
    pub pruned: Vec<UserId>,
}

#[derive(Clone)]
pub struct BroadcastEngine {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
}

impl BroadcastEngine {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn MessageStore>) -> Self {
        Self { registry, store }
    }

    /// Push the current history of `event` to all of its subscribers.
    ///
    /// A dead subscriber is removed from the registry and skipped; it never
    /// stops delivery to the others.
    #[instrument(skip_all, fields(event = %event))]
    pub async fn publish(&self, event: EventId) -> Result<PublishReport, ChatError> {
        let frame = self.snapshot(event).await?;
        let mut report = PublishReport::default();

        for (user, conn) in self.registry.subscribers_of(event) {
            if conn.send(frame.clone()) {
                report.delivered += 1;
                continue;
            }

            warn!(user = %user, "Subscriber unreachable, dropping it");
            if self.registry.remove_connection(user, conn.id()) {
                ChatEventLogger::log_event(ChatEvent::SubscriberPruned {
                    user_id: user.0,
                    event_id: event.0,
                });
                report.pruned.push(user);
            }
        }

        debug!(delivered = report.delivered, pruned = report.pruned.len(), "Published history");
        Ok(report)
    }

    /// Push the current history of `event` to a single connection.
    ///
    /// Returns `false` if that connection is already dead.
    pub async fn publish_to(
        &self,
        event: EventId,
        conn: &ConnectionHandle,
    ) -> Result<bool, ChatError> {
        let frame = self.snapshot(event).await?;
        Ok(conn.send(frame))
    }

    async fn snapshot(&self, event: EventId) -> Result<OutboundFrame, ChatError> {
        let history = self
            .store
            .fetch_history(event)
            .await
            .map_err(ChatError::Gateway)?;
        protocol::history_frame(&history)
    }
}
