//! Wire envelope exchanged over every open chat connection.
//!
//! Every frame is a JSON object `{"kind": ..., "payload": {...}}`. Outbound
//! frames are [`ChatEvent`]s built by the hub; inbound frames are
//! [`ClientFrame`]s sent by browsers and agent consoles. The hub fills in
//! `from` and `sentAt` itself, so clients can never claim another identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event delivered to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum ChatEvent {
    /// A visitor came online for the receiving agent.
    UserOnline {
        uid: String,
        name: String,
        avatar: String,
    },
    /// A visitor left (closed, errored or expired).
    UserOffline { uid: String },
    /// A chat message.
    Message {
        from: String,
        to: String,
        content: String,
        #[serde(rename = "sentAt")]
        sent_at: DateTime<Utc>,
    },
    /// The peer has read the conversation with `visitor_id`.
    ReadReceipt {
        #[serde(rename = "visitorId")]
        visitor_id: String,
    },
}

impl ChatEvent {
    /// Wire name of the event kind, used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::UserOnline { .. } => "userOnline",
            ChatEvent::UserOffline { .. } => "userOffline",
            ChatEvent::Message { .. } => "message",
            ChatEvent::ReadReceipt { .. } => "readReceipt",
        }
    }

    /// Serialize to the JSON text frame sent on the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame received from a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Chat text. Agents must name the destination visitor in `to`;
    /// visitors may omit it since they are bound to one agent.
    Message {
        #[serde(default)]
        to: Option<String>,
        content: String,
    },
    /// The sender has read the conversation with `visitor_id`.
    ReadReceipt {
        #[serde(rename = "visitorId")]
        visitor_id: String,
    },
    /// Application-level heartbeat. Only renews activity.
    Ping,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_uses_kind_payload_envelope() {
        let sent_at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = ChatEvent::Message {
            from: "v1".into(),
            to: "kefu1".into(),
            content: "hello".into(),
            sent_at,
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["kind"], "message");
        assert_eq!(value["payload"]["from"], "v1");
        assert_eq!(value["payload"]["to"], "kefu1");
        assert_eq!(value["payload"]["content"], "hello");
        assert_eq!(value["payload"]["sentAt"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn presence_and_receipt_field_names() {
        let online = serde_json::to_value(ChatEvent::UserOnline {
            uid: "v1".into(),
            name: "Guest".into(),
            avatar: "/static/images/2.png".into(),
        })
        .unwrap();
        assert_eq!(
            online,
            json!({"kind": "userOnline", "payload": {"uid": "v1", "name": "Guest", "avatar": "/static/images/2.png"}})
        );

        let receipt = serde_json::to_value(ChatEvent::ReadReceipt { visitor_id: "v1".into() }).unwrap();
        assert_eq!(receipt, json!({"kind": "readReceipt", "payload": {"visitorId": "v1"}}));
        assert_eq!(ChatEvent::UserOffline { uid: "v1".into() }.kind(), "userOffline");
    }

    #[test]
    fn parse_client_frames() {
        let frame = ClientFrame::parse(r#"{"kind":"message","payload":{"content":"hi"}}"#).unwrap();
        assert_eq!(frame, ClientFrame::Message { to: None, content: "hi".into() });

        let frame =
            ClientFrame::parse(r#"{"kind":"message","payload":{"to":"v2","content":"yo"}}"#).unwrap();
        assert_eq!(frame, ClientFrame::Message { to: Some("v2".into()), content: "yo".into() });

        let frame = ClientFrame::parse(r#"{"kind":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);

        assert!(ClientFrame::parse(r#"{"kind":"userOnline","payload":{}}"#).is_err());
    }
}
