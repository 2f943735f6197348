//! Connection registry: which users hold a live WebSocket on this process.
//!
//! At most one connection per user. A newer connection replaces the older
//! entry; the orphaned socket is left to fail out of its own read loop.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::UserId;

/// Sender half of a connection's outbound channel.
/// Anything holding a clone can push frames to that client's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transport handle with a stable identity, so registry removals can
/// target one exact connection rather than "whatever the user has now".
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId(Uuid::now_v7()),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for the writer task. Returns false once the
    /// connection's writer has gone away.
    pub fn send(&self, msg: axum::extract::ws::Message) -> bool {
        self.sender.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Thread-safe map of user id to live connection.
///
/// DashMap shards its locks, so lookups never wait on each other and a
/// register or removal is atomic for the entry it touches.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `user`. Returns the replaced handle.
    pub fn register(&self, user: UserId, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.inner.insert(user, conn);
        tracing::debug!(
            user_id = user,
            replaced = previous.is_some(),
            online = self.inner.len(),
            "Connection registered"
        );
        previous
    }

    /// Remove whatever entry `user` has. No-op if absent.
    pub fn deregister(&self, user: UserId) -> bool {
        self.inner.remove(&user).is_some()
    }

    /// Remove `user`'s entry only if it still holds `conn`.
    /// A late close from a replaced connection leaves its successor alone.
    pub fn deregister_connection(&self, user: UserId, conn: ConnectionId) -> bool {
        self.inner
            .remove_if(&user, |_, current| current.id == conn)
            .is_some()
    }

    /// Remove whichever entry holds this exact connection, for close paths
    /// that only know the transport handle. Sessions know their user and use
    /// the keyed [`Self::deregister_connection`] instead; this scan is kept
    /// for handle-only callers.
    pub fn deregister_by_connection(&self, conn: ConnectionId) -> Option<UserId> {
        // Collect first: removing while iterating would deadlock on the shard
        let owner = self
            .inner
            .iter()
            .find(|entry| entry.value().id == conn)
            .map(|entry| *entry.key())?;

        self.inner
            .remove_if(&owner, |_, current| current.id == conn)
            .map(|(user, _)| user)
    }

    pub fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.inner.get(&user).map(|entry| entry.value().clone())
    }

    /// Online user ids, ascending.
    pub fn snapshot(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.inner.iter().map(|entry| *entry.key()).collect();
        users.sort_unstable();
        users
    }

    /// Clones of every registered handle, for fan-out outside the map locks.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = handle();
        assert!(registry.register(1, conn.clone()).is_none());
        assert_eq!(registry.lookup(1).map(|c| c.id()), Some(conn.id()));
        assert!(registry.lookup(2).is_none());
    }

    #[test]
    fn test_register_replaces_previous_connection() {
        let registry = ConnectionRegistry::new();
        let (old, mut old_rx) = handle();
        let (new, _new_rx) = handle();

        registry.register(1, old.clone());
        let replaced = registry.register(1, new.clone()).expect("old entry returned");
        assert_eq!(replaced.id(), old.id());
        assert_eq!(registry.lookup(1).unwrap().id(), new.id());
        assert_eq!(registry.len(), 1);

        // Registry does not close the orphaned handle, and never pushes to it again
        assert!(!old.is_closed());
        registry.lookup(1).unwrap().send(Message::Text("hello".into()));
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn test_deregister_is_noop_when_absent() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.deregister(5));
        let (conn, _rx) = handle();
        registry.register(5, conn);
        assert!(registry.deregister(5));
        assert!(!registry.deregister(5));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_late_close_of_replaced_connection_keeps_successor() {
        let registry = ConnectionRegistry::new();
        let (old, _old_rx) = handle();
        let (new, _new_rx) = handle();
        registry.register(1, old.clone());
        registry.register(1, new.clone());

        assert!(!registry.deregister_connection(1, old.id()));
        assert_eq!(registry.lookup(1).unwrap().id(), new.id());

        assert!(registry.deregister_connection(1, new.id()));
        assert!(registry.lookup(1).is_none());
    }

    #[test]
    fn test_deregister_by_connection_only_removes_matching_entry() {
        let registry = ConnectionRegistry::new();
        let (a, _a_rx) = handle();
        let (b, _b_rx) = handle();
        let (stray, _stray_rx) = handle();
        registry.register(1, a.clone());
        registry.register(2, b.clone());

        assert_eq!(registry.deregister_by_connection(stray.id()), None);
        assert_eq!(registry.snapshot(), vec![1, 2]);

        assert_eq!(registry.deregister_by_connection(a.id()), Some(1));
        assert_eq!(registry.snapshot(), vec![2]);
        assert_eq!(registry.deregister_by_connection(a.id()), None);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for user in [9, 3, 7] {
            let (conn, rx) = handle();
            receivers.push(rx);
            registry.register(user, conn);
        }
        assert_eq!(registry.snapshot(), vec![3, 7, 9]);
        assert_eq!(registry.connections().len(), 3);
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let threads: Vec<_> = (0..8)
            .map(|user| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (conn, _rx) = handle();
                        let id = conn.id();
                        registry.register(user, conn);
                        // Only this thread writes this key, so it sees its own insert
                        assert_eq!(registry.lookup(user).map(|c| c.id()), Some(id));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
    }
}
