use crate::api::UploadSettings;
use crate::rpc::ClientSettings;
use crate::streaming::StreamFraming;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration shared by the worker and the front-end.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host the index worker binds and the front-end dials.
    pub index_server_host: String,
    /// Port the index worker binds and the front-end dials.
    pub index_server_port: u16,
    /// Optional seed for the shared secret. When absent both processes fall back to an
    /// endpoint-derived secret.
    pub index_server_auth_key: Option<String>,
    /// Connection attempts made before the client gives up.
    pub index_server_max_retries: u32,
    /// Initial delay between connection attempts, in seconds.
    pub index_server_retry_interval: u64,
    /// Budget for one connection attempt including the handshake, in seconds. The worker
    /// applies the same budget to incoming handshakes.
    pub index_server_connect_timeout: u64,
    /// Port of the front-end HTTP server.
    pub server_port: u16,
    /// Directory where uploaded documents are stored.
    pub documents_dir: PathBuf,
    /// Directory where converted previews are written.
    pub preview_dir: PathBuf,
    /// Optional base URL of the document conversion service.
    pub unoserver_url: Option<String>,
    /// Capacity of each bounded stream queue.
    pub stream_buffer_capacity: usize,
    /// Framing applied to streamed HTTP bodies.
    pub stream_framing: StreamFraming,
}

const DEFAULT_INDEX_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_INDEX_SERVER_PORT: u16 = 5602;
const DEFAULT_MAX_RETRIES: u32 = 10;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 3;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SERVER_PORT: u16 = 5601;
const DEFAULT_STREAM_BUFFER: usize = 64;

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            index_server_host: load_env_optional("INDEX_SERVER_HOST")
                .unwrap_or_else(|| DEFAULT_INDEX_SERVER_HOST.to_string()),
            index_server_port: load_env_or("INDEX_SERVER_PORT", DEFAULT_INDEX_SERVER_PORT)?,
            index_server_auth_key: load_env_optional("INDEX_SERVER_AUTH_KEY"),
            index_server_max_retries: load_env_or("INDEX_SERVER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            index_server_retry_interval: load_env_or(
                "INDEX_SERVER_RETRY_INTERVAL",
                DEFAULT_RETRY_INTERVAL_SECS,
            )?,
            index_server_connect_timeout: load_env_or(
                "INDEX_SERVER_CONNECT_TIMEOUT",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            server_port: load_env_or("PORT", DEFAULT_SERVER_PORT)?,
            documents_dir: load_env_optional("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("documents")),
            preview_dir: load_env_optional("PREVIEW_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("preview_images")),
            unoserver_url: load_env_optional("UNOSERVER_URL"),
            stream_buffer_capacity: load_env_or("STREAM_BUFFER_CAPACITY", DEFAULT_STREAM_BUFFER)?,
            stream_framing: if load_env_or("STREAM_SSE_FRAMING", false)? {
                StreamFraming::EventStream
            } else {
                StreamFraming::Raw
            },
        })
    }

    /// `host:port` of the index worker.
    pub fn rpc_address(&self) -> String {
        format!("{}:{}", self.index_server_host, self.index_server_port)
    }

    /// Directories used by the upload endpoint.
    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            documents_dir: self.documents_dir.clone(),
            preview_dir: self.preview_dir.clone(),
        }
    }

    /// Time allowed for dialling plus the handshake.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.index_server_connect_timeout.max(1))
    }

    /// Connection settings for the RPC client stub.
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            address: self.rpc_address(),
            max_retries: self.index_server_max_retries,
            retry_interval: Duration::from_secs(self.index_server_retry_interval),
            connect_timeout: self.connect_timeout(),
            stream_buffer: self.stream_buffer_capacity,
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        index_server = %config.rpc_address(),
        has_auth_key = config.index_server_auth_key.is_some(),
        server_port = config.server_port,
        max_retries = config.index_server_max_retries,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
