//! Tool registry - ordered, immutable catalogue plus dispatch.
//!
//! Built once from an explicit descriptor list and never mutated afterwards.
//! `run` resolves the name exactly, enforces the auth gate for flagged tools,
//! type-checks present arguments, then hands off to the handler. Handler
//! errors propagate unchanged.

use super::auth::AuthGate;
use super::schema::{check_types, input_schema, prompt_line, ParamDef};
use crate::types::{CallContext, Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Callable body of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// `args` is always a JSON object.
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value>;
}

/// Static description of one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamDef>,
    /// Consult the auth gate before running.
    pub requires_auth: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn new(
        name: &str,
        description: &str,
        params: Vec<ParamDef>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
            requires_auth: false,
            handler: Arc::new(handler),
        }
    }

    /// Mark the tool as mutating or sensitive.
    pub fn gated(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn input_schema(&self) -> Value {
        input_schema(&self.params)
    }
}

/// Introspection view of a descriptor (no handler).
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Immutable name-keyed catalogue preserving registration order.
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    gate: AuthGate,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Empty or duplicate names are rejected.
    pub fn new(descriptors: Vec<ToolDescriptor>, gate: AuthGate) -> Result<Self> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors.iter().enumerate() {
            if descriptor.name.trim().is_empty() {
                return Err(Error::validation("Tool name cannot be empty"));
            }
            if index.insert(descriptor.name.clone(), position).is_some() {
                return Err(Error::validation(format!(
                    "Duplicate tool name: {}",
                    descriptor.name
                )));
            }
        }
        Ok(Self {
            tools: descriptors,
            index,
            gate,
        })
    }

    /// All descriptors, without handlers, in registration order.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|d| ToolInfo {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Compact listing for LLM consumption. `allowed` filters by name.
    pub fn prompt(&self, allowed: Option<&[String]>) -> String {
        let lines: Vec<String> = self
            .tools
            .iter()
            .filter(|d| allowed.map_or(true, |names| names.iter().any(|n| n == &d.name)))
            .map(|d| prompt_line(&d.name, &d.description, &d.params))
            .collect();
        if lines.is_empty() {
            return String::new();
        }
        format!("Available tools:\n{}", lines.join("\n"))
    }

    /// Dispatch one call. `null` arguments become `{}`.
    pub async fn run(&self, name: &str, args: Value, ctx: &CallContext) -> Result<Value> {
        let descriptor = self.get(name).ok_or_else(|| Error::unknown_tool(name))?;

        if descriptor.requires_auth {
            if let Err(err) = self.gate.check(ctx) {
                tracing::warn!(tool = %name, "tool call rejected by auth gate");
                return Err(err);
            }
        }

        let args = match args {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => {
                let errors = check_types(&descriptor.params, &map);
                if !errors.is_empty() {
                    return Err(Error::validation(errors.join("; ")));
                }
                Value::Object(map)
            }
            other => {
                return Err(Error::validation(format!(
                    "arguments must be an object, got {}",
                    other
                )))
            }
        };

        let started = Instant::now();
        let result = descriptor.handler.call(args, ctx).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(tool = %name, latency_ms, "tool call succeeded"),
            Err(err) => tracing::info!(tool = %name, latency_ms, error = %err, "tool call failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::ParamType;
    use crate::types::SessionState;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
            Ok(args)
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for Counting {
        async fn call(&self, _args: Value, _ctx: &CallContext) -> Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"done": true}))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _args: Value, _ctx: &CallContext) -> Result<Value> {
            Err(Error::not_found("order_not_found"))
        }
    }

    fn registry(counter: Arc<AtomicUsize>, gate: AuthGate) -> ToolRegistry {
        ToolRegistry::new(
            vec![
                ToolDescriptor::new(
                    "echo",
                    "Echo arguments",
                    vec![ParamDef::optional("n", ParamType::Int, "A number")],
                    Echo,
                ),
                ToolDescriptor::new("mutate", "Mutates", vec![], Counting(counter)).gated(),
                ToolDescriptor::new("fail", "Always fails", vec![], Failing),
            ],
            gate,
        )
        .unwrap()
    }

    #[test]
    fn test_list_preserves_order_and_hides_handlers() {
        let reg = registry(Arc::default(), AuthGate::open());
        let names: Vec<String> = reg.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "mutate", "fail"]);

        let serialized = serde_json::to_value(reg.list()).unwrap();
        assert!(serialized[0].get("inputSchema").is_some());
        assert!(serialized[0].get("handler").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolRegistry::new(
            vec![
                ToolDescriptor::new("echo", "a", vec![], Echo),
                ToolDescriptor::new("echo", "b", vec![], Echo),
            ],
            AuthGate::open(),
        );
        assert!(result.unwrap_err().to_string().contains("Duplicate tool name"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let reg = registry(Arc::default(), AuthGate::open());
        let err = reg
            .run("no.such.tool", json!({}), &CallContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_lookup_is_exact() {
        let reg = registry(Arc::default(), AuthGate::open());
        assert!(reg.run("ECHO", json!({}), &CallContext::new()).await.is_err());
        assert!(reg.run(" echo", json!({}), &CallContext::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_null_args_become_empty_object() {
        let reg = registry(Arc::default(), AuthGate::open());
        let out = reg.run("echo", Value::Null, &CallContext::new()).await.unwrap();
        assert_eq!(out, json!({}));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_validation_error() {
        let reg = registry(Arc::default(), AuthGate::open());
        let err = reg
            .run("echo", json!({"n": [1]}), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_gated_tool_rejected_before_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let reg = registry(counter.clone(), AuthGate::shared_secret(Some("t".to_string())));
        let ctx = CallContext::new().with_session(Arc::new(SessionState::new()));

        let err = reg.run("mutate", json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "unauthorized");
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert!(reg.gate().authenticate("t", &ctx));
        reg.run("mutate", json!({}), &ctx).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_propagates_unchanged() {
        let reg = registry(Arc::default(), AuthGate::open());
        let err = reg.run("fail", json!({}), &CallContext::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "order_not_found");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_prompt_filtered() {
        let reg = registry(Arc::default(), AuthGate::open());
        let prompt = reg.prompt(Some(&["echo".to_string()]));
        assert!(prompt.starts_with("Available tools:"));
        assert!(prompt.contains("- echo(n?: integer): Echo arguments"));
        assert!(!prompt.contains("mutate"));
        assert!(reg.prompt(Some(&["nonexistent".to_string()])).is_empty());
    }
}
