use crate::blobs::BlobStore;
use crate::config::HeartbeatConfig;
use crate::db::DbPool;
use crate::history::HistoryStore;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket connections; the only shared mutable core structure
    pub registry: ConnectionRegistry,
    /// Durable message history (write side used by the router, read side by REST)
    pub history: HistoryStore,
    /// Attachment file storage
    pub blobs: BlobStore,
    /// Per-connection heartbeat schedule
    pub heartbeat: HeartbeatConfig,
    /// Upper bound for decoded attachment bytes per message
    pub max_attachment_bytes: usize,
}
