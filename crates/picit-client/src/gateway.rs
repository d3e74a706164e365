use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use uuid::Uuid;

use picit_types::events::{GatewayCommand, GatewayEvent};

use crate::error::{ClientError, Result};

/// A live gateway connection that has completed the Identify handshake.
///
/// Pings from the server are answered by the socket while events are read,
/// so callers should keep polling [`GatewayClient::next_event`].
pub struct GatewayClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    user_id: Uuid,
    pending: VecDeque<GatewayEvent>,
}

impl GatewayClient {
    /// Connect to `{base_url}/gateway` and identify with `token`.
    pub async fn connect(base_url: &str, token: &str) -> Result<Self> {
        let ws_url = format!(
            "{}/gateway",
            base_url
                .trim_end_matches('/')
                .replacen("http://", "ws://", 1)
                .replacen("https://", "wss://", 1)
        );

        let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str()).await?;
        let mut client = Self {
            stream,
            user_id: Uuid::nil(),
            pending: VecDeque::new(),
        };

        client
            .send(&GatewayCommand::Identify {
                token: token.to_string(),
            })
            .await?;

        match client.read_event().await? {
            Some(GatewayEvent::Ready { user_id }) => {
                debug!("Gateway ready for {}", user_id);
                client.user_id = user_id;
                Ok(client)
            }
            Some(other) => Err(ClientError::Protocol(format!("expected Ready, got {:?}", other))),
            None => Err(ClientError::Protocol("connection closed during Identify".into())),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Replace the subscribed conversations. Returns the ids the server
    /// accepted; conversations the user is not part of are left out.
    pub async fn subscribe(&mut self, conversation_ids: Vec<Uuid>) -> Result<Vec<Uuid>> {
        self.send(&GatewayCommand::Subscribe { conversation_ids }).await?;

        loop {
            match self.read_event().await? {
                Some(GatewayEvent::Subscribed { conversation_ids }) => return Ok(conversation_ids),
                // Keep anything that raced the ack for the next read
                Some(event) => self.pending.push_back(event),
                None => return Err(ClientError::Protocol("connection closed during Subscribe".into())),
            }
        }
    }

    /// The next event, or `None` once the server closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<GatewayEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.read_event().await
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn send(&mut self, command: &GatewayCommand) -> Result<()> {
        let text = serde_json::to_string(command)?;
        self.stream.send(WsMessage::text(text)).await?;
        Ok(())
    }

    async fn read_event(&mut self) -> Result<Option<GatewayEvent>> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                WsMessage::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}
