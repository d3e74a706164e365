use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use picit_types::events::GatewayEvent;
use picit_types::models::Message;

/// Routes gateway events to connected clients.
///
/// Conversation events go through one broadcast channel; each connection
/// filters them against its own subscriptions. User events go through
/// per-connection channels, so a user signed in on several devices gets
/// them on every connection. Each connection remembers the session it
/// identified with, so ending a session closes exactly its sockets.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> conn_id -> channel
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, UserChannel>>>,
}

struct UserChannel {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to conversation events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a newly stored message to its conversation's subscribers.
    pub fn message_created(&self, message: Message) {
        let _ = self.inner.broadcast_tx.send(GatewayEvent::MessageCreate { message });
    }

    /// Register a connection's targeted channel. Returns (conn_id, receiver).
    /// The receiver yields `None` once the connection's session is ended.
    pub async fn register_connection(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, UserChannel { session_id, tx });
        (conn_id, rx)
    }

    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(connections) = channels.get_mut(&user_id) {
            connections.remove(&conn_id);
            if connections.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send an event to every live connection of a user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some(connections) = channels.get(&user_id) {
            for channel in connections.values() {
                let _ = channel.tx.send(event.clone());
            }
        }
    }

    /// Send `event` to every connection of a user, then drop the channels
    /// of connections identified with `session_id`. Those connections
    /// deliver the event and close; the user's other sessions stay open.
    pub async fn end_session(&self, user_id: Uuid, session_id: Uuid, event: GatewayEvent) {
        self.send_to_user(user_id, event).await;

        let mut channels = self.inner.user_channels.write().await;
        let Some(connections) = channels.get_mut(&user_id) else {
            return;
        };
        connections.retain(|_, channel| channel.session_id != session_id);
        if connections.is_empty() {
            channels.remove(&user_id);
        }
    }

    /// Send an event to one connection only.
    pub async fn send_to_connection(&self, user_id: Uuid, conn_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some(channel) = channels.get(&user_id).and_then(|c| c.get(&conn_id)) {
            let _ = channel.tx.send(event);
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
