//! Per-request call context.
//!
//! Supplied by the calling transport for every `run`. Only the session flag
//! outlives a single call: it is shared with the transport's session so that
//! a successful `authenticate` is visible to later calls on the same session.

use super::ids::{BotId, ServerName, SessionId, UserId};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Mutable per-session auth state.
#[derive(Debug, Default)]
pub struct SessionState {
    id: SessionId,
    authed: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_authed(&self) -> bool {
        self.authed.load(Ordering::Acquire)
    }

    pub fn set_authed(&self, authed: bool) {
        self.authed.store(authed, Ordering::Release);
    }
}

/// Identity, authorization state and record selector for one tool call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub server_name: Option<ServerName>,
    pub session: Option<Arc<SessionState>>,
    pub user_id: Option<UserId>,
    pub bot_id: Option<BotId>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: &str) -> Self {
        self.server_name = ServerName::from_string(name).ok();
        self
    }

    pub fn with_session(mut self, session: Arc<SessionState>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = UserId::from_string(user_id).ok();
        self
    }

    pub fn with_bot(mut self, bot_id: &str) -> Self {
        self.bot_id = BotId::from_string(bot_id).ok();
        self
    }

    /// True only when a session is attached and has been authenticated.
    pub fn is_authed(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_authed())
    }

    /// Build a context from a transport payload, attaching the transport's
    /// session. Blank identifiers are treated as absent.
    pub fn from_wire(wire: WireContext, session: Option<Arc<SessionState>>) -> Self {
        Self {
            server_name: wire.server_name.and_then(|s| ServerName::from_string(s).ok()),
            session,
            user_id: wire.user_id.and_then(|s| UserId::from_string(s).ok()),
            bot_id: wire.bot_id.and_then(|s| BotId::from_string(s).ok()),
        }
    }
}

/// Context fields as they arrive over a transport.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireContext {
    pub server_name: Option<String>,
    pub user_id: Option<String>,
    pub bot_id: Option<String>,
}
