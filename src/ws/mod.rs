pub mod actor;
pub mod handler;
pub mod liveness;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod router;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use registry::{ConnectionId, ConnectionRegistry, RegistryError};

/// Resolved user reference bound to a connection after credential
/// verification. Immutable for the connection's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific
/// client; the connection's writer task owns the receiving end.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
