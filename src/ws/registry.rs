//! Connection registry: the one shared mutable structure in the core.
//!
//! Tracks every live WebSocket connection keyed by a registry-allocated
//! handle. Identity lookup is served from the same map, so the handle view
//! and the identity view can never disagree, no matter how registrations,
//! identity attachments, and removals interleave. A user can hold multiple
//! concurrent connections (multiple devices/tabs); fanout targets all of
//! them.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::ws::{ConnectionSender, Identity};

/// Opaque connection handle, unique for the process lifetime.
pub type ConnectionId = u64;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown connection handle {0}")]
    UnknownConnection(ConnectionId),
}

struct ConnectionEntry {
    identity: Option<Identity>,
    sender: ConnectionSender,
}

/// Shared handle to the registry. Cheap to clone; all methods take `&self`
/// and hold no lock across await points (none of them await).
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    next_id: Arc<AtomicU64>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Add an unidentified connection and return its handle. Handles are
    /// allocated here, so callers cannot reuse one.
    pub fn register(&self, sender: ConnectionSender) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ConnectionEntry {
                identity: None,
                sender,
            },
        );
        id
    }

    /// Bind an identity to an existing connection. Overwriting an
    /// already-set identity is allowed (idempotent re-auth).
    pub fn attach_identity(
        &self,
        id: ConnectionId,
        identity: Identity,
    ) -> Result<(), RegistryError> {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.identity = Some(identity);
                Ok(())
            }
            None => Err(RegistryError::UnknownConnection(id)),
        }
    }

    /// Remove a connection. Safe to call on an already-removed handle;
    /// disconnect races resolve to a no-op.
    pub fn remove(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Identity bound to a connection, if it has identified.
    pub fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        self.connections
            .get(&id)
            .and_then(|entry| entry.identity.clone())
    }

    /// All live handles.
    pub fn all_handles(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// All live handles bound to the given identity id.
    pub fn handles_for(&self, identity_id: &str) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .identity
                    .as_ref()
                    .is_some_and(|ident| ident.id == identity_id)
            })
            .map(|entry| *entry.key())
            .collect()
    }

    /// Snapshot of every live connection's sender, for broadcasts.
    pub fn all_senders(&self) -> Vec<ConnectionSender> {
        self.connections
            .iter()
            .map(|entry| entry.value().sender.clone())
            .collect()
    }

    /// Snapshot of the senders for every live connection of an identity.
    pub fn senders_for(&self, identity_id: &str) -> Vec<ConnectionSender> {
        self.connections
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .identity
                    .as_ref()
                    .is_some_and(|ident| ident.id == identity_id)
            })
            .map(|entry| entry.value().sender.clone())
            .collect()
    }

    /// The current online set: identities of all identified connections,
    /// deduplicated by id. Recomputed on demand, never cached.
    pub fn online_identities(&self) -> Vec<Identity> {
        let mut seen = std::collections::HashSet::new();
        let mut online = Vec::new();
        for entry in self.connections.iter() {
            if let Some(ident) = entry.value().identity.as_ref() {
                if seen.insert(ident.id.clone()) {
                    online.push(ident.clone());
                }
            }
        }
        online
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
