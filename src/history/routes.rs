use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::middleware::Claims;
use crate::history::StoredMessage;
use crate::state::AppState;

/// GET /api/messages/{user_id}
/// Two-way conversation between the caller and `user_id`, oldest first.
/// JWT auth required; callers can only read conversations they are part of
/// because their own id is always one side of the query.
pub async fn get_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, StatusCode> {
    let messages = state
        .history
        .conversation(&claims.sub, &user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load conversation");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}
