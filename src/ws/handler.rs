use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Auth is via `?token=` query
/// param; the token is optional so a client can connect first and identify
/// over the socket.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. A valid token binds the identity at upgrade
/// time; a missing or invalid one starts the connection anonymous — not
/// fatal, the client can retry with an `identify` event.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = params.token.as_deref().and_then(|token| {
        match jwt::resolve_identity(&state.jwt_secret, token) {
            Ok(identity) => Some(identity),
            Err(err) => {
                tracing::warn!(error = %err, "Connection credential rejected, starting anonymous");
                None
            }
        }
    });

    ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
}
