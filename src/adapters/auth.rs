//! The `authenticate` pseudo-tool. Never errors: a bad or missing token is
//! reported as `{ok: false}`.

use super::ToolDeps;
use crate::tools::args::opt_str;
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

struct Authenticate {
    deps: Arc<ToolDeps>,
}

#[async_trait]
impl ToolHandler for Authenticate {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        let token = opt_str(&args, "token").unwrap_or_default();
        let ok = self.deps.gate.authenticate(&token, ctx);
        if ok {
            tracing::info!(session = ?ctx.session.as_ref().map(|s| s.id().to_string()), "session authenticated");
        } else {
            tracing::warn!("authentication attempt rejected");
        }
        Ok(json!({ "ok": ok }))
    }
}

pub(super) fn descriptor(deps: Arc<ToolDeps>) -> ToolDescriptor {
    ToolDescriptor::new(
        "authenticate",
        "Authenticate this session with an access token",
        vec![ParamDef::required("token", ParamType::String, "Access token")],
        Authenticate { deps },
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::deps_with_env;
    use super::*;
    use crate::resolver::MapEnv;
    use crate::tools::AuthGate;
    use crate::types::SessionState;

    fn tool() -> Authenticate {
        let (deps, _) = deps_with_env(MapEnv::new());
        let mut deps = (*deps).clone();
        deps.gate = AuthGate::shared_secret(Some("letmein".to_string()));
        Authenticate { deps: Arc::new(deps) }
    }

    #[tokio::test]
    async fn test_good_token_sets_session_flag() {
        let session = Arc::new(SessionState::new());
        let ctx = CallContext::new().with_session(session.clone());
        let out = tool().call(json!({"token": "letmein"}), &ctx).await.unwrap();
        assert_eq!(out, json!({"ok": true}));
        assert!(session.is_authed());
    }

    #[tokio::test]
    async fn test_bad_or_missing_token_is_not_an_error() {
        let session = Arc::new(SessionState::new());
        let ctx = CallContext::new().with_session(session.clone());
        assert_eq!(tool().call(json!({"token": "nope"}), &ctx).await.unwrap(), json!({"ok": false}));
        assert_eq!(tool().call(json!({}), &ctx).await.unwrap(), json!({"ok": false}));
        assert!(!session.is_authed());
    }
}
