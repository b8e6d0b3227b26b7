//! TCP+JSON IPC transport layer.
//!
//! Length-prefixed JSON frames carrying `{id, service, method, body}`
//! requests. The only service is `tools`, with methods `ListTools`,
//! `RunTool` and `Prompt`.

pub mod codec;
pub mod router;
pub mod server;

pub use server::IpcServer;
