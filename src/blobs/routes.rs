use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
};

use crate::state::AppState;

/// GET /uploads/{stored_name}
/// Serve a stored attachment. The name must be one this server generated;
/// anything else is rejected before touching the filesystem.
pub async fn download(
    State(state): State<AppState>,
    Path(stored_name): Path<String>,
) -> Result<(HeaderMap, Vec<u8>), StatusCode> {
    let path = state
        .blobs
        .resolve(&stored_name)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let bytes = tokio::task::spawn_blocking(move || std::fs::read(&path))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/octet-stream"),
    );

    Ok((headers, bytes))
}
