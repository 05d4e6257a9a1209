use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Owns the presence mapping and delivers events to connected clients.
///
/// One registry per process: each user maps to at most one active push
/// channel, and the last connection to register wins.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events — all connected clients receive them
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Users with a live gateway connection
    online_users: RwLock<HashSet<Uuid>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashSet::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// Replaces any channel a previous connection registered for this user.
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user. No-op if the user has no
    /// active connection — delivery is fire-and-forget.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Register a user as online.
    pub async fn user_online(&self, user_id: Uuid) {
        self.inner.online_users.write().await.insert(user_id);

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        // Only clean up if this connection still owns the user channel
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over — don't touch anything
            return;
        }

        self.inner.online_users.write().await.remove(&user_id);
        self.unregister_user_channel(user_id, conn_id).await;

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: false,
        });
    }

    /// Get the set of currently online users.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.iter().copied().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message_to(user_id: Uuid) -> GatewayEvent {
        GatewayEvent::Ready { user_id }
    }

    #[tokio::test]
    async fn targeted_send_reaches_registered_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_conn, mut rx) = dispatcher.register_user_channel(user).await;
        dispatcher.send_to_user(user, new_message_to(user)).await;

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_offline_user_is_noop() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        // Never registered: no panic, nothing delivered anywhere
        dispatcher.send_to_user(user, new_message_to(user)).await;

        let (conn, mut rx) = dispatcher.register_user_channel(user).await;
        dispatcher.user_offline(user, conn).await;
        dispatcher.send_to_user(user, new_message_to(user)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_connection_wins() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, mut old_rx) = dispatcher.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user).await;

        // The stale connection's teardown must not evict the new channel
        dispatcher.user_offline(user, old_conn).await;

        dispatcher.send_to_user(user, new_message_to(user)).await;
        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_updates_are_broadcast() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let mut rx = dispatcher.subscribe();

        let (conn, _user_rx) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user).await;
        assert_eq!(dispatcher.online_users().await, vec![user]);

        match rx.recv().await.unwrap() {
            GatewayEvent::PresenceUpdate { user_id, online } => {
                assert_eq!(user_id, user);
                assert!(online);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        dispatcher.user_offline(user, conn).await;
        assert!(dispatcher.online_users().await.is_empty());

        match rx.recv().await.unwrap() {
            GatewayEvent::PresenceUpdate { online, .. } => assert!(!online),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
