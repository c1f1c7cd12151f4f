mod auth;
mod blobs;
mod config;
mod db;
mod history;
mod routes;
mod state;
mod users;
mod ws;

use std::net::SocketAddr;
use tokio::net::TcpListener;

use blobs::BlobStore;
use config::{generate_config_template, Config};
use history::HistoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Courier server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Prepare the attachment store directory
    let blobs = BlobStore::new(&config.data_dir);
    blobs.init()?;

    let heartbeat = config.heartbeat.clone().unwrap_or_default();
    let uploads = config.uploads.clone().unwrap_or_default();

    // Build application state
    let app_state = state::AppState {
        db: db.clone(),
        jwt_secret,
        registry: ws::ConnectionRegistry::new(),
        history: HistoryStore::new(db),
        blobs,
        heartbeat,
        max_attachment_bytes: uploads.max_attachment_size_mb as usize * 1024 * 1024,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
