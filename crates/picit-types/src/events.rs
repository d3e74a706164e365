use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// Server confirms which conversations this connection now receives
    Subscribed { conversation_ids: Vec<Uuid> },

    /// A message was inserted into a subscribed conversation.
    /// Delivery is at-least-once; clients de-duplicate on `message.id`.
    MessageCreate { message: Message },

    /// The user's session was ended or replaced
    SessionChanged { event: SessionEvent },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    SignedOut,
    TokenRefreshed,
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to a conversation.
    /// Events that return `None` are delivered through per-user channels.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.conversation_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of conversations this connection receives messages for.
    /// Conversations the user does not participate in are dropped.
    Subscribe { conversation_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn message_event_is_scoped_to_its_conversation() {
        let conversation_id = Uuid::new_v4();
        let event = GatewayEvent::MessageCreate {
            message: Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: Uuid::new_v4(),
                recipient_id: Uuid::new_v4(),
                content: "hi".into(),
                timestamp: Utc::now(),
            },
        };
        assert_eq!(event.conversation_id(), Some(conversation_id));

        let session = GatewayEvent::SessionChanged { event: SessionEvent::SignedOut };
        assert_eq!(session.conversation_id(), None);
    }

    #[test]
    fn commands_use_tagged_json() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"Subscribe","data":{{"conversation_ids":["{id}"]}}}}"#);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::Subscribe { conversation_ids: vec![id] });

        let json = serde_json::to_value(GatewayEvent::SessionChanged {
            event: SessionEvent::TokenRefreshed,
        })
        .unwrap();
        assert_eq!(json["type"], "SessionChanged");
        assert_eq!(json["data"]["event"], "token_refreshed");
    }
}
