//! Wire events exchanged over a client WebSocket.
//!
//! Everything is JSON with an internal `type` tag. The format is private to
//! this service; only the field semantics are stable.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::history::Attachment;
use crate::ws::{ConnectionSender, Identity};

/// Events a client sends to the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind (or re-bind) an identity to this connection. Allowed at any
    /// point, including as a retry after an invalid credential.
    Identify { token: String },
    /// Send a direct message. At least one of `text`/`attachment` required.
    Message {
        recipient: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        attachment: Option<AttachmentUpload>,
    },
}

/// Inline attachment payload: client-supplied display name plus
/// base64-encoded bytes.
#[derive(Debug, Deserialize)]
pub struct AttachmentUpload {
    pub name: String,
    pub data: String,
}

/// Events the server sends to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Presence snapshot: everyone currently online.
    Online { online: Vec<Identity> },
    /// Message delivery to the recipient's live connections.
    Message {
        sender: String,
        recipient: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
        message_id: String,
    },
    /// A rejected event. The connection stays open.
    Error { code: &'static str, message: String },
}

/// Encode an event as a WebSocket text message.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Encode and send an event to one connection. Send failures mean the
/// connection is going away; the actor's cleanup handles that.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        let _ = tx.send(msg);
    }
}

/// Send an error event.
pub fn send_error(tx: &ConnectionSender, code: &'static str, message: impl Into<String>) {
    send_event(
        tx,
        &ServerEvent::Error {
            code,
            message: message.into(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"identify","token":"abc"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Identify { token } if token == "abc"));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"message","recipient":"u-1","text":"hi"}"#,
        )
        .unwrap();
        match event {
            ClientEvent::Message {
                recipient,
                text,
                attachment,
            } => {
                assert_eq!(recipient, "u-1");
                assert_eq!(text.as_deref(), Some("hi"));
                assert!(attachment.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_an_error() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn server_events_omit_absent_fields() {
        let json = serde_json::to_string(&ServerEvent::Message {
            sender: "a".to_string(),
            recipient: "b".to_string(),
            text: Some("hi".to_string()),
            attachment: None,
            message_id: "m-1".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"message""#));
        assert!(!json.contains("attachment"));
    }
}
