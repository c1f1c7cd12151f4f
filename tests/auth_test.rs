//! Integration tests for account registration, login, and token introspection.

use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use courier_server::blobs::BlobStore;
use courier_server::config::HeartbeatConfig;
use courier_server::history::HistoryStore;
use courier_server::state::AppState;
use courier_server::ws::ConnectionRegistry;

/// Helper: start the server on a random port and return its base URL.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = courier_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let blobs = BlobStore::new(&data_dir);
    blobs.init().expect("Failed to create uploads dir");

    let state = AppState {
        db: db.clone(),
        jwt_secret,
        registry: ConnectionRegistry::new(),
        history: HistoryStore::new(db),
        blobs,
        heartbeat: HeartbeatConfig::default(),
        max_attachment_bytes: 1024 * 1024,
    };

    let app = courier_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_register_returns_token_and_identity() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({"username": "alice", "password": "correct horse"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    assert!(!body["user_id"].as_str().unwrap().is_empty());
    let token = body["access_token"].as_str().unwrap();

    // Token round-trips through the profile endpoint
    let profile: serde_json::Value = client
        .get(format!("{}/api/auth/profile", base_url))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["username"], "alice");
    assert_eq!(profile["user_id"], body["user_id"]);
}

#[tokio::test]
async fn test_register_rejects_duplicate_username() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    for expected in [201, 409] {
        let resp = client
            .post(format!("{}/api/auth/register", base_url))
            .json(&json!({"username": "bob", "password": "hunter2hunter2"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), expected);
    }
}

#[tokio::test]
async fn test_register_rejects_weak_input() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({"username": "  ", "password": "long enough pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({"username": "carol", "password": "short"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_login_verifies_password() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({"username": "dave", "password": "swordfish-123"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&json!({"username": "dave", "password": "swordfish-123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["access_token"].as_str().unwrap().is_empty());

    let resp = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&json!({"username": "dave", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Unknown username answers the same as a wrong password
    let resp = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&json!({"username": "nobody", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/auth/profile", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/api/users", base_url))
        .header("Authorization", "Bearer not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
