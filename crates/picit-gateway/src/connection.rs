use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use picit_db::Database;
use picit_types::api::Claims;
use picit_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a new socket gets to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection: Identify handshake, then relay
/// events until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };
    let user_id = claims.sub;
    let session_id = claims.sid;

    // Registered before the session check, so an ending session cannot slip past
    let (conn_id, user_rx) = dispatcher.register_connection(user_id, session_id).await;
    if !session_active(&db, user_id, session_id).await {
        warn!("{} identified with an inactive session, closing", user_id);
        dispatcher.unregister_connection(user_id, conn_id).await;
        return;
    }

    info!("{} connected to gateway", user_id);

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        dispatcher.unregister_connection(user_id, conn_id).await;
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id, conn_id, user_rx).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    conn_id: Uuid,
    mut user_rx: mpsc::UnboundedReceiver<GatewayEvent>,
) {
    let mut broadcast_rx = dispatcher.subscribe();

    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !is_subscribed(&send_subscriptions, &event) {
                        continue;
                    }
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    // Channel dropped: the session this socket identified with has ended
                    let Some(event) = result else {
                        debug!("Session of connection {} ended, closing", conn_id);
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Identify { .. }) => {} // Already handled
                    Ok(GatewayCommand::Subscribe { conversation_ids }) => {
                        let accepted = participating(&db, user_id, conversation_ids).await;
                        info!("{} subscribed to {} conversations", user_id, accepted.len());
                        match subscriptions.write() {
                            Ok(mut subs) => *subs = accepted.iter().copied().collect(),
                            Err(e) => {
                                error!("Subscription lock poisoned: {}", e);
                                break;
                            }
                        }
                        dispatcher_recv
                            .send_to_connection(
                                user_id,
                                conn_id,
                                GatewayEvent::Subscribed { conversation_ids: accepted },
                            )
                            .await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad command: {} -- raw: {}", user_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_connection(user_id, conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

/// The claims of the first valid `Identify`, if one arrives in time.
async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    let token = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg
                && let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text)
            {
                return Some(token);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()?;

    decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

async fn session_active(db: &Arc<Database>, user_id: Uuid, session_id: Uuid) -> bool {
    let db = db.clone();
    let active = tokio::task::spawn_blocking(move || {
        db.is_session_active(&session_id.to_string(), &user_id.to_string())
    })
    .await;

    match active {
        Ok(Ok(active)) => {
            if !active {
                debug!("Identify with inactive session {}", session_id);
            }
            active
        }
        Ok(Err(e)) => {
            error!("Session lookup failed: {}", e);
            false
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            false
        }
    }
}

/// Keep the conversations `user_id` takes part in, in request order.
async fn participating(db: &Arc<Database>, user_id: Uuid, requested: Vec<Uuid>) -> Vec<Uuid> {
    let db = db.clone();
    let uid = user_id.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let mut accepted = Vec::with_capacity(requested.len());
        for id in requested {
            match db.get_conversation(&id.to_string())? {
                Some(conversation) if conversation.has_participant(&uid) => {
                    if !accepted.contains(&id) {
                        accepted.push(id);
                    }
                }
                _ => debug!("{} may not subscribe to {}", uid, id),
            }
        }
        Ok::<_, anyhow::Error>(accepted)
    })
    .await;

    match result {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => {
            error!("Subscription check failed: {}", e);
            Vec::new()
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Vec::new()
        }
    }
}

/// Conversation events pass only when subscribed; all others pass.
fn is_subscribed(subscriptions: &Subscriptions, event: &GatewayEvent) -> bool {
    match event.conversation_id() {
        Some(conversation_id) => subscriptions
            .read()
            .map(|subs| subs.contains(&conversation_id))
            .unwrap_or(false),
        None => true,
    }
}

/// Returns false once the socket is unusable.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
