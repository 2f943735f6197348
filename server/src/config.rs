use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Presence and direct messaging server
///
/// Only flags that were actually passed are serialized, so unset flags never
/// mask values from the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "chat-server", version, about = "Presence and direct messaging server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "CHAT_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "CHAT_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./chat.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Print an access token for the given user id and exit
    #[arg(long, value_name = "USER_ID")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<UserId>,

    /// Data directory for persistent state (DB, keys) [default: ./data]
    #[arg(long, env = "CHAT_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Shared HS256 secret. When unset a random key is kept in data_dir.
    #[arg(long, env = "CHAT_JWT_SECRET")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Seconds to wait for connections to drain on shutdown [default: 10]
    #[arg(long, env = "CHAT_SHUTDOWN_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_secs: Option<u64>,
}

/// Effective server configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    #[serde(default)]
    pub issue_token: Option<UserId>,
    pub data_dir: String,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    pub shutdown_timeout_secs: u64,

    /// Real-time channel configuration ([ws] section in TOML)
    #[serde(default)]
    pub ws: WsConfig,
}

/// Keepalive settings for real-time connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the connection (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./chat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            issue_token: None,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            shutdown_timeout_secs: 10,
            ws: WsConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    /// Merge parsed command-line flags over the file and environment layers.
    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Self::figment(&config_path)
            .merge(Serialized::defaults(cli))
            .extract()
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Serialized::default("config", config_path))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CHAT_").split("__"))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat Server Configuration
# Place this file at ./chat.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHAT_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# Shared HS256 secret for access tokens. Leave unset to generate one in data_dir.
# jwt_secret = ""

# Seconds to wait for open connections to close on shutdown
# shutdown_timeout_secs = 10

# ---- Real-time channel ----
# [ws]

# Seconds between server pings
# ping_interval_secs = 30

# Seconds to wait for a pong before the connection is dropped
# pong_timeout_secs = 10
"#
    .to_string()
}
