//! services/api/src/web/presence.rs
//!
//! Tracks which users currently hold a live signaling connection, and owns
//! the outbound channel to each of them. At most one connection per user: a
//! reconnect replaces the old entry, and the superseded socket's cleanup is
//! a no-op because its connection id no longer matches.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::web::protocol::ServerMessage;

/// One live connection: the channel its writer task drains, plus an id that
/// distinguishes it from any connection that replaces it.
struct ConnectionHandle {
    conn_id: Uuid,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// The shared registry of online users.
#[derive(Default)]
pub struct PresenceRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a connection for `user_id`, replacing any existing one.
    /// Returns the connection id (needed for guarded cleanup) and the
    /// receiving end the socket's writer task should drain.
    pub async fn register(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        let previous = self
            .connections
            .write()
            .await
            .insert(user_id, ConnectionHandle { conn_id, sender });
        if previous.is_some() {
            debug!(%user_id, "replaced existing signaling connection");
        }
        (conn_id, receiver)
    }

    /// Removes the user's connection, but only if it is still the one
    /// identified by `conn_id`. Returns whether an entry was removed, which
    /// tells the caller whether the user actually went offline.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Delivers a message to one user. Returns `false` when the user has no
    /// live connection (or its channel is already closed).
    pub async fn send_to(&self, user_id: Uuid, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&user_id) {
            Some(handle) => handle.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Delivers a message to every connected user except `excluded`.
    pub async fn broadcast_except(&self, excluded: Uuid, message: ServerMessage) {
        let connections = self.connections.read().await;
        for (user_id, handle) in connections.iter() {
            if *user_id != excluded {
                // A closed channel just means that socket is mid-teardown.
                let _ = handle.sender.send(message.clone());
            }
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_send() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (_conn, mut rx) = presence.register(user).await;

        assert!(presence.is_online(user).await);
        assert!(
            presence
                .send_to(user, ServerMessage::UserOnline { user_id: user })
                .await
        );
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::UserOnline { .. })
        ));
    }

    #[tokio::test]
    async fn send_to_absent_user_reports_offline() {
        let presence = PresenceRegistry::new();
        let absent = Uuid::new_v4();
        assert!(
            !presence
                .send_to(absent, ServerMessage::UserOffline { user_id: absent })
                .await
        );
    }

    #[tokio::test]
    async fn reconnect_replaces_and_stale_unregister_is_noop() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (old_conn, _old_rx) = presence.register(user).await;
        let (_new_conn, mut new_rx) = presence.register(user).await;

        // The old socket's cleanup must not knock the new connection offline.
        assert!(!presence.unregister(user, old_conn).await);
        assert!(presence.is_online(user).await);

        assert!(
            presence
                .send_to(user, ServerMessage::UserOnline { user_id: user })
                .await
        );
        assert!(new_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn matching_unregister_removes_the_connection() {
        let presence = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = presence.register(user).await;

        assert!(presence.unregister(user, conn).await);
        assert!(!presence.is_online(user).await);
    }

    #[tokio::test]
    async fn broadcast_skips_the_excluded_user() {
        let presence = PresenceRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_a, mut alice_rx) = presence.register(alice).await;
        let (_b, mut bob_rx) = presence.register(bob).await;

        presence
            .broadcast_except(alice, ServerMessage::UserOnline { user_id: alice })
            .await;

        assert!(bob_rx.recv().await.is_some());
        assert!(alice_rx.try_recv().is_err());
    }
}
