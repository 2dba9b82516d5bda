//! Connection Registry.
//!
//! Routes from a user to the live connection it registered and the event it
//! is subscribed to. One entry per user, last registration wins.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use eventchat_core::{ConnectionId, EventId, UserId};

use crate::protocol::OutboundFrame;

/// Non-owning route to a session's socket.
///
/// The session's writer task owns the write half; a handle can only queue
/// frames for it. Once the writer has stopped (socket error, write timeout,
/// session teardown) every send fails.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for delivery. Returns `false` if the connection is dead.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Resolves once the writer side has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[derive(Debug, Clone)]
struct Entry {
    conn: ConnectionHandle,
    event: EventId,
}

/// Concurrent user → (connection, event) map shared by every session.
///
/// Backed by a sharded map, so sessions on different users rarely contend.
/// Iteration never holds a shard lock while the caller acts on an entry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<UserId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user` on `event`, replacing any previous registration.
    /// Returns the displaced connection, if there was one.
    pub fn put(
        &self,
        user: UserId,
        conn: ConnectionHandle,
        event: EventId,
    ) -> Option<ConnectionHandle> {
        let previous = self
            .entries
            .insert(user, Entry { conn, event })
            .map(|e| e.conn);
        if let Some(prev) = &previous {
            info!(user = %user, displaced = %prev.id(), "Replaced existing registration");
        }
        debug!(user = %user, event = %event, "Registered connection");
        previous
    }

    /// Drop whatever is registered for `user`. Idempotent.
    pub fn remove(&self, user: UserId) -> bool {
        self.entries.remove(&user).is_some()
    }

    /// Drop the registration of `user` only if it still belongs to `conn`.
    ///
    /// Stale sessions and failed deliveries use this so they never evict a
    /// newer connection of the same user.
    pub fn remove_connection(&self, user: UserId, conn: ConnectionId) -> bool {
        self.entries
            .remove_if(&user, |_, entry| entry.conn.id() == conn)
            .is_some()
    }

    /// Point-in-time view of the connections subscribed to `event`.
    ///
    /// Concurrent registrations may or may not show up; the returned iterator
    /// is detached from the map and safe to consume while it changes.
    pub fn subscribers_of(&self, event: EventId) -> std::vec::IntoIter<(UserId, ConnectionHandle)> {
        let snapshot: Vec<(UserId, ConnectionHandle)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().event == event)
            .map(|entry| (*entry.key(), entry.value().conn.clone()))
            .collect();
        snapshot.into_iter()
    }

    pub fn event_of(&self, user: UserId) -> Option<EventId> {
        self.entries.get(&user).map(|e| e.event)
    }

    pub fn connection_of(&self, user: UserId) -> Option<ConnectionId> {
        self.entries.get(&user).map(|e| e.conn.id())
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.entries.contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(ConnectionId::new(), tx), rx)
    }

    #[test]
    fn test_put_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = handle();
        assert!(registry.put(UserId(7), conn.clone(), EventId(3)).is_none());
        assert_eq!(registry.event_of(UserId(7)), Some(EventId(3)));
        assert_eq!(registry.connection_of(UserId(7)), Some(conn.id()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();
        registry.put(UserId(7), first.clone(), EventId(3));
        let displaced = registry.put(UserId(7), second.clone(), EventId(4)).unwrap();

        assert_eq!(displaced.id(), first.id());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.event_of(UserId(7)), Some(EventId(4)));
        assert_eq!(registry.connection_of(UserId(7)), Some(second.id()));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = handle();
        registry.put(UserId(7), conn, EventId(3));
        assert!(registry.remove(UserId(7)));
        assert!(!registry.remove(UserId(7)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_connection_cannot_evict_newer_one() {
        let registry = ConnectionRegistry::new();
        let (old, _rx1) = handle();
        let (new, _rx2) = handle();
        registry.put(UserId(7), old.clone(), EventId(3));
        registry.put(UserId(7), new.clone(), EventId(3));

        assert!(!registry.remove_connection(UserId(7), old.id()));
        assert!(registry.contains(UserId(7)));
        assert!(registry.remove_connection(UserId(7), new.id()));
        assert!(!registry.contains(UserId(7)));
    }

    #[test]
    fn test_subscribers_of_filters_by_event() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = handle();
        let (b, _rb) = handle();
        let (c, _rc) = handle();
        registry.put(UserId(1), a, EventId(3));
        registry.put(UserId(2), b, EventId(3));
        registry.put(UserId(3), c, EventId(4));

        let mut users: Vec<UserId> = registry
            .subscribers_of(EventId(3))
            .map(|(u, _)| u)
            .collect();
        users.sort();
        assert_eq!(users, vec![UserId(1), UserId(2)]);
        assert_eq!(registry.subscribers_of(EventId(9)).count(), 0);
    }

    #[test]
    fn test_mutation_while_iterating_snapshot() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for user in 0..16 {
            let (conn, rx) = handle();
            receivers.push(rx);
            registry.put(UserId(user), conn, EventId(1));
        }

        for (user, conn) in registry.subscribers_of(EventId(1)) {
            registry.remove_connection(user, conn.id());
            let (fresh, rx) = handle();
            receivers.push(rx);
            registry.put(UserId(user.0 + 100), fresh, EventId(1));
        }

        assert_eq!(registry.len(), 16);
        assert!(registry.subscribers_of(EventId(1)).all(|(u, _)| u.0 >= 100));
    }

    #[tokio::test]
    async fn test_concurrent_put_remove() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();
        for user in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let conn = ConnectionHandle::new(ConnectionId::new(), tx);
                    let id = conn.id();
                    registry.put(UserId(user), conn, EventId(user % 4));
                    let _ = registry.subscribers_of(EventId(user % 4)).count();
                    registry.remove_connection(UserId(user), id);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handle_reports_dead_connection() {
        let (conn, rx) = handle();
        assert!(conn.send("[]".into()));
        drop(rx);
        assert!(!conn.send("[]".into()));
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
    }
}
