use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::state::AppState;
use crate::ws::protocol::{self, ClientEvent};
use crate::ws::{liveness, presence, router, Identity};

/// Run the actor-per-connection pattern for one WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Heartbeat task: probes the peer and declares it dead on pong timeout
/// - Reader loop (this task): processes incoming events one at a time
///
/// The mpsc channel allows any part of the system to send messages to this
/// client by cloning the sender. `identity` is Some when a valid credential
/// arrived with the upgrade request; an anonymous connection can still
/// identify later over the socket.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Option<Identity>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection; identity attaches in the same breath when
    // the upgrade carried a valid credential.
    let handle = state.registry.register(tx.clone());
    let identified = identity.is_some();
    if let Some(identity) = identity {
        tracing::info!(handle, user_id = %identity.id, "WebSocket actor started");
        // Cannot fail: the handle was registered one line up and only this
        // actor removes it.
        let _ = state.registry.attach_identity(handle, identity);
    } else {
        tracing::info!(handle, "WebSocket actor started (anonymous)");
    }

    if identified {
        // Membership changed: announce to everyone, new connection included
        presence::broadcast_presence(&state.registry);
    } else {
        // Not part of the online set yet; hydrate just this client
        presence::send_snapshot(&state.registry, &tx);
    }

    // Spawn writer task: forwards mpsc messages to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception and spawn the heartbeat monitor
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();
    let heartbeat_handle = tokio::spawn(liveness::run_heartbeat(
        state.heartbeat.clone(),
        tx.clone(),
        pong_rx,
        dead_tx,
    ));

    // Reader loop: process incoming WebSocket messages one at a time.
    // The heartbeat's dead signal also ends the loop, so an unresponsive
    // peer is torn down without waiting for the transport to notice.
    loop {
        tokio::select! {
            _ = &mut dead_rx => {
                tracing::info!(handle, "Connection declared dead by heartbeat");
                break;
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => router::handle_event(&state, handle, &tx, event).await,
                        Err(e) => {
                            tracing::debug!(handle, error = %e, "Unparseable client event");
                            protocol::send_error(&tx, "invalid_message", "Malformed event");
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(handle, "Ignoring binary frame (protocol is JSON text)");
                }
                Some(Ok(Message::Pong(_))) => {
                    // Pong received — notify the heartbeat task
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(data))) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(handle, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(handle, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::info!(handle, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Cleanup: stop the writer and heartbeat, drop the registration, and
    // re-announce presence. remove() is idempotent, so racing exits (close
    // frame plus heartbeat death) resolve harmlessly.
    writer_handle.abort();
    heartbeat_handle.abort();
    state.registry.remove(handle);
    presence::broadcast_presence(&state.registry);

    tracing::info!(handle, "WebSocket actor stopped");
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
