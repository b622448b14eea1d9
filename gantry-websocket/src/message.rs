//! The JSON envelope exchanged with WebSocket clients.

use crate::error::WebSocketResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Wire envelope: `{"type": …, "data": …, "target": …}`.
///
/// `target` is set by the hub on user-targeted sends and omitted on
/// broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            target: None,
        }
    }

    /// The greeting enqueued to every client on registration.
    pub fn welcome(client_id: &str) -> Self {
        Self::new(
            "welcome",
            serde_json::json!({ "client_id": client_id }),
        )
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Serialize into a text frame.
    pub fn to_ws_message(&self) -> WebSocketResult<WsMessage> {
        let json = serde_json::to_string(self)?;
        Ok(WsMessage::Text(json.into()))
    }

    /// Parse a text frame; `None` for non-text frames.
    pub fn from_ws_message(message: &WsMessage) -> Option<WebSocketResult<Self>> {
        match message {
            WsMessage::Text(text) => {
                Some(serde_json::from_str(text.as_str()).map_err(Into::into))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new("chat", serde_json::json!({"t": "hi"}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["data"]["t"], "hi");
        assert!(json.get("target").is_none());
    }

    #[test]
    fn test_targeted_envelope_carries_target() {
        let envelope = Envelope::new("ping", Value::Null).with_target("user-1");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["target"], "user-1");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_welcome_type() {
        let envelope = Envelope::welcome("c1");
        assert_eq!(envelope.kind, "welcome");
        assert_eq!(envelope.data["client_id"], "c1");
    }

    #[test]
    fn test_ws_message_roundtrip() {
        let envelope = Envelope::new("chat", serde_json::json!({"n": 1}));
        let frame = envelope.to_ws_message().unwrap();
        let parsed = Envelope::from_ws_message(&frame).unwrap().unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_non_text_frames_are_skipped() {
        let frame = WsMessage::Ping(vec![1, 2].into());
        assert!(Envelope::from_ws_message(&frame).is_none());
    }
}
