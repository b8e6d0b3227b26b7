//! # Tool Factory - tool registry and configuration resolution
//!
//! The layer of the chatbot admin backend that exposes a catalogue of
//! callable tools to the LLM runtime:
//! - Ordered, immutable tool registry with JSON schemas and exact-name dispatch
//! - Layered config resolution: call arguments, named server records, environment
//! - Session auth gate for sensitive tools
//! - Bounded outbound HTTP with normalized upstream errors
//! - Vendor adapters (Stripe, DHL, PrestaShop, Gmail, generic HTTP) and
//!   conversation-store tools
//!
//! ## Architecture
//!
//! ```text
//!   IPC request → ToolRegistry::run
//!                   │ lookup (exact name)
//!                   │ AuthGate (gated tools)
//!                   │ argument type check
//!                   ▼
//!                 adapter ──► ConfigResolver ──► SystemStore / EnvSource
//!                   │
//!                   ├──► RequestExecutor (timeout clamped, cancellable)
//!                   ├──► Database (bound parameters, transactions)
//!                   └──► Broadcaster (conversation.* events)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod adapters;
pub mod bus;
pub mod executor;
pub mod fanout;
pub mod identity;
pub mod ipc;
pub mod resolver;
pub mod sanitize;
pub mod store;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use adapters::{build_registry, builtin_tools, ToolDeps};
pub use tools::{AuthGate, ToolRegistry};
pub use types::{CallContext, Config, Error, IpcConfig, Result};
