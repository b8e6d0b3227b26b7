//! Built-in tool adapters.
//!
//! Each adapter family gets one handler type that is registered once per
//! operation. Handlers receive every collaborator through [`ToolDeps`]; none
//! of them keeps state between calls.

mod auth;
mod conversations;
mod dhl;
mod files;
mod gmail;
mod http;
mod prestashop;
mod stripe;

use crate::bus::{Broadcaster, BusEvent, NullBroadcaster};
use crate::executor::RequestExecutor;
use crate::identity::IdentityResolver;
use crate::resolver::{ConfigResolver, EnvSource, ProcessEnv};
use crate::sanitize::{BasicSanitizer, TextSanitizer};
use crate::store::{Database, SqliteStore};
use crate::tools::{AuthGate, ToolDescriptor, ToolRegistry};
use crate::types::{CallContext, Config, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub use http::ProxyRequest;

/// Collaborators shared by every built-in tool.
#[derive(Clone)]
pub struct ToolDeps {
    pub resolver: ConfigResolver,
    pub executor: RequestExecutor,
    pub identity: IdentityResolver,
    pub db: Arc<dyn Database>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub sanitizer: Arc<dyn TextSanitizer>,
    /// Root directory `files.preview` is confined to. Unset disables it.
    pub files_root: Option<PathBuf>,
    pub gate: AuthGate,
}

impl fmt::Debug for ToolDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDeps")
            .field("files_root", &self.files_root)
            .finish_non_exhaustive()
    }
}

impl ToolDeps {
    /// Wire every collaborator to one SQLite store and the process
    /// environment.
    pub fn from_store(
        store: SqliteStore,
        config: &Config,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self> {
        Self::with_env(store, config, broadcaster, Arc::new(ProcessEnv))
    }

    pub fn with_env(
        store: SqliteStore,
        config: &Config,
        broadcaster: Arc<dyn Broadcaster>,
        env: Arc<dyn EnvSource>,
    ) -> Result<Self> {
        let store = Arc::new(store);
        let executor = RequestExecutor::new(&config.executor)?;
        Ok(Self {
            resolver: ConfigResolver::new(store.clone(), env),
            identity: IdentityResolver::new(store.clone(), executor.clone()),
            executor,
            db: store,
            broadcaster,
            sanitizer: Arc::new(BasicSanitizer),
            files_root: config.database.files_root.clone(),
            gate: AuthGate::shared_secret(config.auth.shared_token.clone()),
        })
    }

    /// Same wiring with a no-op broadcaster.
    pub fn quiet(store: SqliteStore, config: &Config) -> Result<Self> {
        Self::from_store(store, config, Arc::new(NullBroadcaster))
    }

    /// Best-effort notification; a failing broadcaster never fails the call.
    pub(crate) async fn notify(&self, event_type: &str, payload: serde_json::Value, ctx: &CallContext) {
        let event = BusEvent::new(event_type, payload)
            .for_bot(ctx.bot_id.as_ref().map(|b| b.to_string()));
        if let Err(err) = self.broadcaster.broadcast(event).await {
            tracing::warn!(event_type, error = %err, "broadcast failed");
        }
    }
}

/// Every built-in tool, in catalogue order.
pub fn builtin_tools(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    let mut tools = vec![auth::descriptor(deps.clone())];
    tools.extend(http::descriptors(deps.clone()));
    tools.extend(stripe::descriptors(deps.clone()));
    tools.extend(dhl::descriptors(deps.clone()));
    tools.extend(prestashop::descriptors(deps.clone()));
    tools.extend(gmail::descriptors(deps.clone()));
    tools.extend(conversations::descriptors(deps.clone()));
    tools.extend(files::descriptors(deps));
    tools
}

/// Registry over [`builtin_tools`], gated by `deps.gate`.
pub fn build_registry(deps: Arc<ToolDeps>) -> Result<ToolRegistry> {
    let gate = deps.gate.clone();
    ToolRegistry::new(builtin_tools(deps), gate)
}


#[cfg(test)]
mod tests {
    use super::test_support::deps_with_env;
    use super::*;
    use crate::resolver::MapEnv;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_names_unique_and_ordered() {
        let (deps, _) = deps_with_env(MapEnv::new());
        let registry = build_registry(deps).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names[0], "authenticate");
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), names.len());
        for expected in [
            "http_get_json",
            "http_post_json",
            "stripe.get",
            "stripe.post",
            "stripe.get_payment_intent",
            "dhl.track_shipment",
            "prestashop.get",
            "prestashop.get_order",
            "gmail.list_messages",
            "gmail.get_message",
            "db.list_conversations",
            "db.get_conversation",
            "db.append_message",
            "db.delete_conversation",
            "db.raw_query",
            "files.preview",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_mutating_tools_are_gated() {
        let (deps, _) = deps_with_env(MapEnv::new());
        let registry = build_registry(deps).unwrap();
        for name in ["db.append_message", "db.delete_conversation", "stripe.post", "http_post_json"] {
            assert!(registry.get(name).unwrap().requires_auth, "{} not gated", name);
        }
        assert!(!registry.get("authenticate").unwrap().requires_auth);
    }
}
