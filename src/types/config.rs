//! Configuration structures.
//!
//! Configuration is loaded from defaults, overridden by `TOOL_FACTORY_*`
//! environment variables. Vendor credentials are NOT configured here: they
//! come from the resolution chain (arguments → named record → environment).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lower bound for any outbound request timeout (ms).
pub const MIN_TIMEOUT_MS: u64 = 100;
/// Upper bound for any outbound request timeout (ms).
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Outbound HTTP configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Persisted store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Auth gate configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,
}

impl Config {
    /// Defaults overridden by `TOOL_FACTORY_*` variables. Unparseable values
    /// keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(addr) = get("TOOL_FACTORY_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }
        if let Some(level) = get("TOOL_FACTORY_LOG_LEVEL") {
            config.observability.log_level = level;
        }
        if let Some(format) = get("TOOL_FACTORY_LOG_FORMAT") {
            config.observability.json_logs = format.eq_ignore_ascii_case("json");
        }
        if let Some(ms) = get("TOOL_FACTORY_DEFAULT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.executor.default_timeout_ms = ms;
        }
        if let Some(bytes) = get("TOOL_FACTORY_ERROR_BODY_BYTES").and_then(|v| v.parse().ok()) {
            config.executor.error_body_bytes = bytes;
        }
        if let Some(bytes) = get("TOOL_FACTORY_MAX_RESPONSE_BYTES").and_then(|v| v.parse().ok()) {
            config.executor.max_response_bytes = bytes;
        }
        if let Some(path) = get("TOOL_FACTORY_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }
        if let Some(root) = get("TOOL_FACTORY_FILES_ROOT") {
            config.database.files_root = Some(PathBuf::from(root));
        }
        if let Some(secret) = get("TOOL_FACTORY_AUTH_TOKEN") {
            config.auth.shared_token = Some(secret);
        }
        config
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IPC server bind address (TCP).
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50061".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Timeout used when a call does not request one (ms, clamped like any other).
    pub default_timeout_ms: u64,

    /// Raw-body prefix kept in upstream error messages.
    pub error_body_bytes: usize,

    /// Largest response body read from an upstream before giving up.
    pub max_response_bytes: usize,

    /// User agent for all outbound requests.
    pub user_agent: String,

    /// Connect timeout for the shared client.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 15_000,
            error_body_bytes: 500,
            max_response_bytes: 10 * 1024 * 1024,
            user_agent: concat!("tool-factory/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Persisted store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,

    /// Root directory for file preview tools. `None` disables them.
    pub files_root: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tool-factory.sqlite"),
            files_root: None,
        }
    }
}

/// Auth gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared secret for `authenticate`. When unset, no tool requires auth.
    pub shared_token: Option<String>,
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections. Connections beyond this limit
    /// are rejected.
    pub max_connections: usize,

    /// Read timeout in seconds per frame. Idle connections are dropped.
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 256,
            read_timeout_secs: 300,
            write_timeout_secs: 10,
        }
    }
}
