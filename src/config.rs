use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Courier direct-messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "courier-server", version, about = "Courier direct-messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "COURIER_PORT", default_value = "4040")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "COURIER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./courier.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COURIER_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT key, uploads)
    #[arg(long, env = "COURIER_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Heartbeat configuration (loaded from [heartbeat] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub heartbeat: Option<HeartbeatConfig>,

    /// Attachment upload configuration (loaded from [uploads] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub uploads: Option<UploadsConfig>,
}

/// Per-connection heartbeat schedule. A connection that misses the pong
/// deadline after a probe is evicted, so worst-case detection is
/// interval + timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Milliseconds between heartbeat probes (default: 5000)
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Milliseconds to wait for a pong after a probe (default: 1000)
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            timeout_ms: 1000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_heartbeat_timeout() -> u64 {
    1000
}

/// Configuration for message attachment uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Maximum attachment size in megabytes per message (default: 10)
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size_mb: u32,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_attachment_size_mb: 10,
        }
    }
}

fn default_max_attachment_size() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4040,
            bind_address: "0.0.0.0".to_string(),
            config: "./courier.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            heartbeat: Some(HeartbeatConfig::default()),
            uploads: Some(UploadsConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURIER_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("COURIER_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Courier Server Configuration
# Place this file at ./courier.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURIER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4040)
# port = 4040

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database, JWT signing key, and uploaded files
# data_dir = "./data"

# ---- Connection Heartbeats ----
# [heartbeat]

# Milliseconds between heartbeat probes per connection (default: 5000)
# interval_ms = 5000

# Milliseconds to wait for a pong after a probe before evicting (default: 1000)
# timeout_ms = 1000

# ---- Attachment Uploads ----
# [uploads]

# Maximum attachment size in megabytes per message (default: 10)
# max_attachment_size_mb = 10
"#
    .to_string()
}
