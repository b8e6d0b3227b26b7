//! Top-level IPC router - routes by service and method onto the registry.

use crate::tools::ToolRegistry;
use crate::types::{CallContext, Error, Result, SessionState, WireContext};
use serde_json::{json, Value};
use std::sync::Arc;

/// Route one request. `session` is the connection's session.
pub async fn route_request(
    registry: &ToolRegistry,
    session: &Arc<SessionState>,
    service: &str,
    method: &str,
    body: Value,
) -> Result<Value> {
    match service {
        "tools" => handle_tools(registry, session, method, body).await,
        _ => Err(Error::not_found(format!("Unknown service: {}", service))),
    }
}

async fn handle_tools(
    registry: &ToolRegistry,
    session: &Arc<SessionState>,
    method: &str,
    body: Value,
) -> Result<Value> {
    match method {
        "ListTools" => Ok(json!({ "tools": registry.list() })),
        "Prompt" => {
            let allowed: Option<Vec<String>> = match body.get("allowed") {
                None | Some(Value::Null) => None,
                Some(v) => Some(serde_json::from_value(v.clone())?),
            };
            Ok(json!({ "prompt": registry.prompt(allowed.as_deref()) }))
        }
        "RunTool" => {
            let name = str_field(&body, "name")?;
            let args = body.get("args").cloned().unwrap_or(Value::Null);
            let wire: WireContext = match body.get("context") {
                None | Some(Value::Null) => WireContext::default(),
                Some(v) => serde_json::from_value(v.clone())?,
            };
            let ctx = CallContext::from_wire(wire, Some(session.clone()));
            let result = registry.run(&name, args, &ctx).await?;
            Ok(json!({ "result": result }))
        }
        _ => Err(Error::not_found(format!("Unknown tools method: {}", method))),
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

pub fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::validation(format!("Missing required field: {}", key)))
}
