//! Core types.
//!
//! - **IDs**: Strongly-typed identifiers (ServerName, UserId, ...)
//! - **Errors**: The error taxonomy shared by every tool
//! - **Config**: Process configuration
//! - **Context**: Per-call identity and session state

mod config;
mod context;
mod errors;
mod ids;

pub use config::{
    AuthConfig, Config, DatabaseConfig, ExecutorConfig, IpcConfig, ObservabilityConfig,
    ServerConfig, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};
pub use context::{CallContext, SessionState, WireContext};
pub use errors::{Error, Result};
pub use ids::{BotId, ServerName, SessionId, UserId};
