//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Display
//! strings are short and machine-matchable: transports forward them as-is and
//! decide what the end user or LLM runtime sees.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for tool dispatch and adapters.
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument is missing or malformed (checked before any I/O).
    #[error("{0}")]
    Validation(String),

    /// Named record or downstream entity absent.
    #[error("{0}")]
    NotFound(String),

    /// Dispatch target not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Required credential absent after the full resolution chain.
    #[error("config_missing: {0}")]
    ConfigMissing(String),

    /// Auth gate failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Tool is switched off.
    #[error("disabled: {0}")]
    Disabled(String),

    /// Non-2xx from a vendor whose status is authoritative.
    #[error("upstream_http_error: {status}: {message}")]
    UpstreamHttp { status: u16, message: String },

    /// Outbound call exceeded its effective timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Outbound call failed below HTTP (DNS, connect, TLS, body read).
    #[error("network_error: {0}")]
    Network(String),

    /// Persisted store failure.
    #[error("database_error: {0}")]
    Database(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code for transport-level status mapping.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) | Error::UnknownTool(_) => "NOT_FOUND",
            Error::ConfigMissing(_) => "FAILED_PRECONDITION",
            Error::Unauthorized => "UNAUTHENTICATED",
            Error::Disabled(_) => "UNAVAILABLE",
            Error::UpstreamHttp { .. } | Error::Network(_) => "UPSTREAM",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::Database(_) | Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => {
                "INTERNAL"
            }
        }
    }

    /// Upstream status code, when the error came from a vendor response.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::UpstreamHttp { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool(name.into())
    }

    pub fn config_missing(adapter: impl Into<String>) -> Self {
        Self::ConfigMissing(adapter.into())
    }

    pub fn disabled(tool: impl Into<String>) -> Self {
        Self::Disabled(tool.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamHttp {
            status,
            message: message.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}
