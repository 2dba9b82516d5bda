use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use eventchat_core::{
    ChatMessage, EventId, IdentityGateway, MessageStore, NewMessage, UserId, sort_history,
};

/// Simple in-memory chat store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryChatStore {
    users: RwLock<HashSet<UserId>>,
    events: RwLock<HashSet<EventId>>,
    messages: RwLock<HashMap<EventId, Vec<ChatMessage>>>,
    next_id: AtomicI64,
    reject_appends: AtomicBool,
    reject_reads: AtomicBool,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store that already knows the given users and events.
    pub async fn seeded(
        users: impl IntoIterator<Item = i64>,
        events: impl IntoIterator<Item = i64>,
    ) -> Self {
        let store = Self::new();
        for id in users {
            store.add_user(UserId(id)).await;
        }
        for id in events {
            store.add_event(EventId(id)).await;
        }
        store
    }

    pub async fn add_user(&self, id: UserId) {
        self.users.write().await.insert(id);
    }

    pub async fn add_event(&self, id: EventId) {
        self.events.write().await.insert(id);
    }

    /// Simulate a storage outage: every append fails while set.
    pub fn reject_appends(&self, reject: bool) {
        self.reject_appends.store(reject, Ordering::SeqCst);
    }

    /// Make every history fetch fail while set.
    pub fn reject_reads(&self, reject: bool) {
        self.reject_reads.store(reject, Ordering::SeqCst);
    }

    /// Total number of stored messages across all events.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl IdentityGateway for InMemoryChatStore {
    async fn user_exists(&self, id: UserId) -> Result<bool> {
        Ok(self.users.read().await.contains(&id))
    }

    async fn event_exists(&self, id: EventId) -> Result<bool> {
        Ok(self.events.read().await.contains(&id))
    }
}

#[async_trait]
impl MessageStore for InMemoryChatStore {
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage> {
        if self.reject_appends.load(Ordering::SeqCst) {
            bail!("store is rejecting writes");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = ChatMessage::from_new(id, message);

        let mut messages = self.messages.write().await;
        let history = messages.entry(stored.event).or_default();
        history.push(stored.clone());
        sort_history(history);
        Ok(stored)
    }

    async fn fetch_history(&self, event: EventId) -> Result<Vec<ChatMessage>> {
        if self.reject_reads.load(Ordering::SeqCst) {
            bail!("store is rejecting reads");
        }
        let messages = self.messages.read().await;
        Ok(messages.get(&event).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_identity() {
        let store = InMemoryChatStore::seeded([7], [3]).await;
        assert!(store.user_exists(UserId(7)).await.unwrap());
        assert!(!store.user_exists(UserId(999)).await.unwrap());
        assert!(store.event_exists(EventId(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = InMemoryChatStore::new();
        let a = store
            .append_message(NewMessage::new(UserId(1), EventId(1), "a"))
            .await
            .unwrap();
        let b = store
            .append_message(NewMessage::new(UserId(1), EventId(1), "b"))
            .await
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.fetch_history(EventId(1)).await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_rejecting_appends() {
        let store = InMemoryChatStore::new();
        store.reject_appends(true);
        assert!(
            store
                .append_message(NewMessage::new(UserId(1), EventId(1), "x"))
                .await
                .is_err()
        );
        assert_eq!(store.message_count().await, 0);

        store.reject_appends(false);
        assert!(
            store
                .append_message(NewMessage::new(UserId(1), EventId(1), "x"))
                .await
                .is_ok()
        );
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejecting_reads_keeps_messages() {
        let store = InMemoryChatStore::new();
        store
            .append_message(NewMessage::new(UserId(1), EventId(1), "kept"))
            .await
            .unwrap();

        store.reject_reads(true);
        assert!(store.fetch_history(EventId(1)).await.is_err());

        store.reject_reads(false);
        let history = store.fetch_history(EventId(1)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "kept");
    }
}
