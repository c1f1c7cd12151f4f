//! Durable message history backed by SQLite.
//!
//! The message router persists every message here before forwarding, so a
//! delivered message always has a durable record and an id. The REST layer
//! reads past conversations through the same store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Attachment reference carried by a message: the client-supplied name is
/// display metadata only; `stored_name` is the server-generated file name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub stored_name: String,
}

/// A message as handed to the store, before it has an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

/// A persisted message. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    db: DbPool,
}

impl HistoryStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Persist a message and return it with its assigned id.
    /// UUIDv7 ids are timestamp-ordered, so id order tracks arrival order.
    pub async fn save(&self, msg: NewMessage) -> Result<StoredMessage, HistoryError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| HistoryError::Unavailable(format!("DB lock: {}", e)))?;

            let id = Uuid::now_v7().to_string();
            let created_at = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, body, attachment_name, attachment_stored_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    msg.sender,
                    msg.recipient,
                    msg.text,
                    msg.attachment.as_ref().map(|a| a.name.as_str()),
                    msg.attachment.as_ref().map(|a| a.stored_name.as_str()),
                    created_at,
                ],
            )?;

            Ok(StoredMessage {
                id,
                sender: msg.sender,
                recipient: msg.recipient,
                text: msg.text,
                attachment: msg.attachment,
                created_at,
            })
        })
        .await
        .map_err(|e| HistoryError::Unavailable(format!("Task join: {}", e)))?
    }

    /// Fetch the two-way conversation between `a` and `b`, oldest first.
    pub async fn conversation(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, HistoryError> {
        let db = self.db.clone();
        let a = a.to_string();
        let b = b.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| HistoryError::Unavailable(format!("DB lock: {}", e)))?;

            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, body, attachment_name, attachment_stored_name, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;

            let messages: Vec<StoredMessage> = stmt
                .query_map(rusqlite::params![a, b], |row| {
                    let attachment_name: Option<String> = row.get(4)?;
                    let attachment_stored_name: Option<String> = row.get(5)?;
                    let attachment = match (attachment_name, attachment_stored_name) {
                        (Some(name), Some(stored_name)) => Some(Attachment { name, stored_name }),
                        _ => None,
                    };

                    Ok(StoredMessage {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        recipient: row.get(2)?,
                        text: row.get(3)?,
                        attachment,
                        created_at: row.get(6)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();

            Ok(messages)
        })
        .await
        .map_err(|e| HistoryError::Unavailable(format!("Task join: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn insert_user(pool: &DbPool, id: &str, username: &str) {
        let conn = pool.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, 'x', ?3)",
            rusqlite::params![id, username, Utc::now().to_rfc3339()],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn save_assigns_id_and_round_trips() {
        let pool = db::open_in_memory();
        insert_user(&pool, "u-alice", "alice");
        insert_user(&pool, "u-bob", "bob");
        let store = HistoryStore::new(pool);

        let stored = store
            .save(NewMessage {
                sender: "u-alice".to_string(),
                recipient: "u-bob".to_string(),
                text: Some("hi".to_string()),
                attachment: None,
            })
            .await
            .unwrap();

        assert!(!stored.id.is_empty());

        let conv = store.conversation("u-alice", "u-bob").await.unwrap();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv[0].id, stored.id);
        assert_eq!(conv[0].text.as_deref(), Some("hi"));
        assert!(conv[0].attachment.is_none());
    }

    #[tokio::test]
    async fn conversation_is_two_way_and_ordered() {
        let pool = db::open_in_memory();
        insert_user(&pool, "u-alice", "alice");
        insert_user(&pool, "u-bob", "bob");
        insert_user(&pool, "u-carol", "carol");
        let store = HistoryStore::new(pool);

        for (sender, recipient, text) in [
            ("u-alice", "u-bob", "one"),
            ("u-bob", "u-alice", "two"),
            ("u-alice", "u-carol", "unrelated"),
            ("u-alice", "u-bob", "three"),
        ] {
            store
                .save(NewMessage {
                    sender: sender.to_string(),
                    recipient: recipient.to_string(),
                    text: Some(text.to_string()),
                    attachment: None,
                })
                .await
                .unwrap();
        }

        let conv = store.conversation("u-bob", "u-alice").await.unwrap();
        let texts: Vec<_> = conv.iter().filter_map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn attachment_fields_survive_storage() {
        let pool = db::open_in_memory();
        insert_user(&pool, "u-alice", "alice");
        insert_user(&pool, "u-bob", "bob");
        let store = HistoryStore::new(pool);

        let stored = store
            .save(NewMessage {
                sender: "u-alice".to_string(),
                recipient: "u-bob".to_string(),
                text: None,
                attachment: Some(Attachment {
                    name: "notes.txt".to_string(),
                    stored_name: "0191-abc.txt".to_string(),
                }),
            })
            .await
            .unwrap();

        let conv = store.conversation("u-alice", "u-bob").await.unwrap();
        assert_eq!(conv[0].attachment, stored.attachment);
        assert_eq!(
            conv[0].attachment.as_ref().unwrap().stored_name,
            "0191-abc.txt"
        );
    }
}
