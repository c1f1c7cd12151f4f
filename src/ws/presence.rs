//! Presence snapshots and broadcast.
//!
//! The snapshot is ephemeral: recomputed from the registry on every
//! membership change, computed once per broadcast and sent to the
//! membership as of that computation. Bursts of changes produce redundant
//! broadcasts; that is acceptable (idempotent, cheap).

use crate::ws::protocol::{self, ServerEvent};
use crate::ws::{ConnectionRegistry, ConnectionSender};

/// Compute the current online set and push it to every live connection,
/// identified or not. Called whenever registry membership changes.
pub fn broadcast_presence(registry: &ConnectionRegistry) {
    let event = ServerEvent::Online {
        online: registry.online_identities(),
    };
    let Some(msg) = protocol::encode(&event) else {
        return;
    };

    for sender in registry.all_senders() {
        let _ = sender.send(msg.clone());
    }
}

/// Send the current snapshot to a single connection. Used to hydrate a
/// connection that registered anonymously and is not yet part of the
/// online set itself.
pub fn send_snapshot(registry: &ConnectionRegistry, tx: &ConnectionSender) {
    protocol::send_event(
        tx,
        &ServerEvent::Online {
            online: registry.online_identities(),
        },
    );
}
