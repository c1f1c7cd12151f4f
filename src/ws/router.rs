//! Inbound event routing: identify and message events.
//!
//! Messages are persisted before they are forwarded, so every delivered
//! message carries the id of a durable record. Forwarding is best-effort
//! per recipient connection; an offline recipient is not an error — the
//! message rests in history until fetched.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use crate::auth::jwt;
use crate::blobs::BlobError;
use crate::history::{Attachment, HistoryError, NewMessage};
use crate::state::AppState;
use crate::ws::protocol::{self, AttachmentUpload, ClientEvent, ServerEvent};
use crate::ws::{ConnectionId, ConnectionSender};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("connection has not identified")]
    Unauthenticated,
    #[error("{0}")]
    InvalidMessage(&'static str),
    #[error("failed to persist message: {0}")]
    PersistenceFailed(#[from] HistoryError),
    #[error("failed to store attachment: {0}")]
    WriteFailed(#[from] BlobError),
}

impl RouterError {
    /// Stable error code carried in the wire-level error event.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::Unauthenticated => "unauthenticated",
            RouterError::InvalidMessage(_) => "invalid_message",
            RouterError::PersistenceFailed(_) => "persistence_failed",
            RouterError::WriteFailed(_) => "write_failed",
        }
    }
}

/// Outcome of a successfully routed message.
#[derive(Debug)]
pub struct RouteOutcome {
    pub message_id: String,
    /// Number of live recipient connections the delivery event reached.
    pub delivered: usize,
}

/// Dispatch one decoded client event. Rejections answer the sender with an
/// error event; the connection stays open either way.
pub async fn handle_event(
    state: &AppState,
    handle: ConnectionId,
    tx: &ConnectionSender,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Identify { token } => handle_identify(state, handle, tx, &token),
        ClientEvent::Message {
            recipient,
            text,
            attachment,
        } => {
            if let Err(err) = route_message(state, handle, recipient, text, attachment).await {
                tracing::debug!(handle, error = %err, "Rejected inbound message");
                protocol::send_error(tx, err.code(), err.to_string());
            }
        }
    }
}

/// Resolve a credential and bind the identity to this connection.
/// An invalid credential leaves the connection anonymous; the client may
/// retry with a fresh token.
fn handle_identify(state: &AppState, handle: ConnectionId, tx: &ConnectionSender, token: &str) {
    match jwt::resolve_identity(&state.jwt_secret, token) {
        Ok(identity) => {
            let user_id = identity.id.clone();
            match state.registry.attach_identity(handle, identity) {
                Ok(()) => {
                    tracing::info!(handle, user_id = %user_id, "Connection identified");
                    crate::ws::presence::broadcast_presence(&state.registry);
                }
                Err(err) => {
                    // Disconnect race: the connection vanished between event
                    // receipt and attach. Nothing to clean up.
                    tracing::debug!(handle, error = %err, "Identify raced with disconnect");
                }
            }
        }
        Err(err) => {
            tracing::debug!(handle, error = %err, "Invalid connection credential");
            protocol::send_error(tx, "invalid_credential", "Credential rejected");
        }
    }
}

/// Validate, persist, and forward one message.
pub async fn route_message(
    state: &AppState,
    handle: ConnectionId,
    recipient: String,
    text: Option<String>,
    attachment: Option<AttachmentUpload>,
) -> Result<RouteOutcome, RouterError> {
    // 1. Sender must have identified; no partial processing otherwise.
    let sender = state
        .registry
        .identity_of(handle)
        .ok_or(RouterError::Unauthenticated)?;

    // 2. Validate before any side effect.
    let recipient = recipient.trim().to_string();
    if recipient.is_empty() {
        return Err(RouterError::InvalidMessage("recipient is required"));
    }
    let text = text.filter(|t| !t.is_empty());
    if text.is_none() && attachment.is_none() {
        return Err(RouterError::InvalidMessage(
            "message requires text or an attachment",
        ));
    }
    let attachment_bytes = match &attachment {
        Some(upload) => {
            let bytes = STANDARD
                .decode(&upload.data)
                .map_err(|_| RouterError::InvalidMessage("attachment data is not valid base64"))?;
            if bytes.len() > state.max_attachment_bytes {
                return Err(RouterError::InvalidMessage("attachment too large"));
            }
            Some(bytes)
        }
        None => None,
    };

    // 3. Store attachment bytes under a server-generated name. A failed
    //    write rejects the whole message: a delivery must never reference
    //    an attachment that was not stored.
    let stored_attachment = match (attachment, attachment_bytes) {
        (Some(upload), Some(bytes)) => {
            let stored_name = state.blobs.store(bytes, &upload.name).await?;
            Some(Attachment {
                name: upload.name,
                stored_name,
            })
        }
        _ => None,
    };

    // 4. Persist before forwarding, so delivery always carries the id of a
    //    durable record.
    let stored = state
        .history
        .save(NewMessage {
            sender: sender.id.clone(),
            recipient: recipient.clone(),
            text,
            attachment: stored_attachment,
        })
        .await?;

    // 5. Fan out to every live connection of the recipient. Send failures
    //    mean that connection is already tearing down; the others still get
    //    their copy.
    let event = ServerEvent::Message {
        sender: stored.sender.clone(),
        recipient: stored.recipient.clone(),
        text: stored.text.clone(),
        attachment: stored.attachment.clone(),
        message_id: stored.id.clone(),
    };
    let recipients = state.registry.senders_for(&recipient);
    let mut delivered = 0;
    if let Some(msg) = protocol::encode(&event) {
        for sender_tx in &recipients {
            if sender_tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
    }

    if delivered == 0 {
        tracing::debug!(
            message_id = %stored.id,
            recipient = %recipient,
            "Recipient offline; message stored for later retrieval"
        );
    } else {
        tracing::debug!(
            message_id = %stored.id,
            recipient = %recipient,
            delivered,
            "Message delivered"
        );
    }

    Ok(RouteOutcome {
        message_id: stored.id,
        delivered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::config::HeartbeatConfig;
    use crate::db;
    use crate::history::HistoryStore;
    use crate::ws::{ConnectionRegistry, Identity};
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let pool = db::open_in_memory();
        let blobs = BlobStore::new(dir.path().to_str().unwrap());
        blobs.init().unwrap();
        AppState {
            db: pool.clone(),
            jwt_secret: vec![0; 32],
            registry: ConnectionRegistry::new(),
            history: HistoryStore::new(pool),
            blobs,
            heartbeat: HeartbeatConfig::default(),
            max_attachment_bytes: 1024,
        }
    }

    fn connect_identified(
        state: &AppState,
        user_id: &str,
    ) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = state.registry.register(tx);
        state
            .registry
            .attach_identity(
                handle,
                Identity {
                    id: user_id.to_string(),
                    display_name: user_id.to_string(),
                },
            )
            .unwrap();
        (handle, rx)
    }

    fn insert_user(state: &AppState, id: &str) {
        let conn = state.db.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?1, 'x', '2024-01-01')",
            rusqlite::params![id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn unidentified_sender_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = state.registry.register(tx);

        let err = route_message(&state, handle, "u-bob".to_string(), Some("hi".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Unauthenticated));
        assert_eq!(err.code(), "unauthenticated");

        let conv = state.history.conversation("u-alice", "u-bob").await.unwrap();
        assert!(conv.is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_invalid_and_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        insert_user(&state, "u-alice");
        insert_user(&state, "u-bob");
        let (handle, _rx) = connect_identified(&state, "u-alice");

        let err = route_message(&state, handle, "u-bob".to_string(), Some(String::new()), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_message");

        let conv = state.history.conversation("u-alice", "u-bob").await.unwrap();
        assert!(conv.is_empty());
    }

    #[tokio::test]
    async fn offline_recipient_persists_with_zero_deliveries() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        insert_user(&state, "u-alice");
        insert_user(&state, "u-bob");
        let (handle, _rx) = connect_identified(&state, "u-alice");

        let outcome = route_message(&state, handle, "u-bob".to_string(), Some("hi".into()), None)
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 0);

        let conv = state.history.conversation("u-alice", "u-bob").await.unwrap();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv[0].id, outcome.message_id);
    }

    #[tokio::test]
    async fn online_recipient_gets_one_delivery_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        insert_user(&state, "u-alice");
        insert_user(&state, "u-bob");
        let (alice, _alice_rx) = connect_identified(&state, "u-alice");
        let (_bob1, mut bob1_rx) = connect_identified(&state, "u-bob");
        let (_bob2, mut bob2_rx) = connect_identified(&state, "u-bob");

        let outcome = route_message(&state, alice, "u-bob".to_string(), Some("hi".into()), None)
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 2);

        for rx in [&mut bob1_rx, &mut bob2_rx] {
            let msg = rx.try_recv().unwrap();
            let Message::Text(json) = msg else {
                panic!("expected text frame");
            };
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["type"], "message");
            assert_eq!(value["sender"], "u-alice");
            assert_eq!(value["text"], "hi");
            assert_eq!(value["message_id"], outcome.message_id);
        }
    }

    #[tokio::test]
    async fn attachment_is_stored_under_generated_name() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        insert_user(&state, "u-alice");
        insert_user(&state, "u-bob");
        let (alice, _rx) = connect_identified(&state, "u-alice");

        let outcome = route_message(
            &state,
            alice,
            "u-bob".to_string(),
            None,
            Some(AttachmentUpload {
                name: "notes.txt".to_string(),
                data: STANDARD.encode(b"attachment body"),
            }),
        )
        .await
        .unwrap();

        let conv = state.history.conversation("u-alice", "u-bob").await.unwrap();
        let attachment = conv[0].attachment.as_ref().unwrap();
        assert_eq!(conv[0].id, outcome.message_id);
        assert_eq!(attachment.name, "notes.txt");
        assert_ne!(attachment.stored_name, "notes.txt");

        let path = state.blobs.resolve(&attachment.stored_name).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"attachment body");
    }

    #[tokio::test]
    async fn oversized_attachment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        insert_user(&state, "u-alice");
        let (alice, _rx) = connect_identified(&state, "u-alice");

        let err = route_message(
            &state,
            alice,
            "u-bob".to_string(),
            None,
            Some(AttachmentUpload {
                name: "big.bin".to_string(),
                data: STANDARD.encode(vec![0u8; 2048]),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "invalid_message");
    }
}
