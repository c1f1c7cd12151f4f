//! Account endpoints: registration, login, and token introspection.
//!
//! Passwords are bcrypt-hashed; on success both endpoints return an access
//! token the client presents as a Bearer header (REST) or `?token=` query
//! parameter (WebSocket).

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub username: String,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub username: String,
}

/// POST /api/auth/register
/// Create a new account. Username must be unique; password is bcrypt-hashed
/// before storage. Returns an access token on success.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), (StatusCode, String)> {
    let username = req.username.trim().to_string();
    if username.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Username cannot be empty".to_string(),
        ));
    }
    if req.password.len() < 8 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let db = state.db.clone();
    let password = req.password;
    let insert_username = username.clone();

    // bcrypt is deliberately slow; hash and insert on the blocking pool
    let user_id = tokio::task::spawn_blocking(move || {
        let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Hash: {}", e)))?;

        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let user_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, insert_username, password_hash, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                (StatusCode::CONFLICT, "Username already taken".to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, format!("DB insert: {}", other)),
        })?;

        Ok::<_, (StatusCode, String)>(user_id)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user_id, &username)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Token: {}", e)))?;

    tracing::info!(user_id = %user_id, username = %username, "Account registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            username,
            access_token,
        }),
    ))
}

/// POST /api/auth/login
/// Verify credentials and issue an access token. Unknown username and wrong
/// password both answer 401 without distinguishing which failed.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let db = state.db.clone();
    let username = req.username.trim().to_string();
    let password = req.password;
    let lookup_username = username.clone();

    let user_id = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB lock: {}", e)))?;

        let (user_id, password_hash): (String, String) = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1",
                rusqlite::params![lookup_username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

        let matches = bcrypt::verify(&password, &password_hash)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Verify: {}", e)))?;
        if !matches {
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
        }

        Ok::<_, (StatusCode, String)>(user_id)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user_id, &username)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Token: {}", e)))?;

    Ok(Json(AuthResponse {
        user_id,
        username,
        access_token,
    }))
}

/// GET /api/auth/profile — Return the identity behind the presented token.
pub async fn profile(claims: Claims) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user_id: claims.sub,
        username: claims.username,
    })
}
