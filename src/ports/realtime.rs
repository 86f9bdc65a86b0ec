//! Realtime Port
//!
//! Message envelope pushed to live client connections and the push seam the
//! notification manager and monitor depend on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Notification,
    StatusUpdate,
    TradeUpdate,
    Error,
}

/// Server -> client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message_type: MessageType, data: serde_json::Value) -> Self {
        Self {
            message_type,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn notification(data: serde_json::Value) -> Self {
        Self::new(MessageType::Notification, data)
    }

    pub fn status(data: serde_json::Value) -> Self {
        Self::new(MessageType::StatusUpdate, data)
    }
}

/// Client -> server message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    /// Reserved
    Subscribe {
        #[serde(flatten)]
        params: serde_json::Map<String, serde_json::Value>,
    },
}

/// Push side of the realtime gateway
pub trait RealtimePush: Send + Sync {
    /// Deliver to every live connection of `user_id`; true if at least one was reached
    fn send_to_user(&self, user_id: &str, envelope: Envelope) -> bool;

    /// Deliver to every live connection
    fn broadcast(&self, envelope: Envelope) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::status(serde_json::json!({"status": "pong"}));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "status_update");
        assert_eq!(json["data"]["status"], "pong");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_client_messages_parse() {
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);

        let sub: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","channel":"trades"}"#).unwrap();
        assert!(matches!(sub, ClientMessage::Subscribe { .. }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }
}
