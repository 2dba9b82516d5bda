use anyhow::Result;
use async_trait::async_trait;

use crate::message::{ChatMessage, NewMessage};
use crate::types::{EventId, UserId};

/// Existence checks against the identity store.
///
/// Implementations are called concurrently from every session and must be
/// safe to share behind an `Arc`.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn user_exists(&self, id: UserId) -> Result<bool>;

    async fn event_exists(&self, id: EventId) -> Result<bool>;
}

/// Durable message storage. The single source of truth for history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message and return it with its store-assigned id.
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage>;

    /// All messages of an event, ascending by send time then id.
    async fn fetch_history(&self, event: EventId) -> Result<Vec<ChatMessage>>;
}
