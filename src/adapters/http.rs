//! Generic REST proxies and the request shape shared by vendor proxies.

use super::ToolDeps;
use crate::executor::{join_url, HttpRequest};
use crate::resolver::{AdapterFamily, ResolvedConfig};
use crate::tools::args::{opt_str, opt_u64, string_map};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pass-through call assembled from tool arguments.
///
/// Header precedence, lowest first: record defaults, adapter credentials,
/// call-supplied headers.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: Option<u64>,
}

impl ProxyRequest {
    /// Read `path`, `query`, `headers`, `body` and `timeout_ms` from `args`.
    pub fn from_args(method: Method, args: &Value) -> Result<Self> {
        let path = opt_str(args, "path")
            .or_else(|| opt_str(args, "url"))
            .ok_or_else(|| Error::validation("path_required"))?;
        let body = match args.get("body") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.clone()),
        };
        Ok(Self {
            method,
            path,
            query: string_map(args, "query")?,
            headers: string_map(args, "headers")?,
            body,
            timeout_ms: opt_u64(args, "timeout_ms")?,
        })
    }

    /// Build the outbound request against `base_url`.
    pub fn into_request(
        self,
        base_url: Option<&str>,
        record_headers: &BTreeMap<String, String>,
        credentials: &BTreeMap<String, String>,
    ) -> Result<HttpRequest> {
        let absolute = self.path.starts_with("http://") || self.path.starts_with("https://");
        let url = match base_url {
            Some(base) => join_url(base, &self.path),
            None if absolute => self.path.clone(),
            None => return Err(Error::validation("base_url_required")),
        };
        Ok(HttpRequest::new(self.method, url)
            .headers(record_headers)
            .headers(credentials)
            .headers(&self.headers)
            .query_map(&self.query)
            .timeout_ms(self.timeout_ms))
    }
}

/// Common argument list for pass-through tools.
pub(super) fn proxy_params(with_body: bool) -> Vec<ParamDef> {
    let mut params = vec![
        ParamDef::required("path", ParamType::String, "Path relative to the base URL, or an absolute URL"),
        ParamDef::optional("query", ParamType::Object, "Query parameters"),
        ParamDef::optional("headers", ParamType::Object, "Extra request headers; override defaults"),
    ];
    if with_body {
        params.push(ParamDef::optional("body", ParamType::Any, "Request body"));
    }
    params.push(ParamDef::optional("timeout_ms", ParamType::Int, "Request timeout in milliseconds"));
    params
}

/// Send and return `{ok, status, headers, body}` whatever the status.
pub(super) async fn pass_through(deps: &ToolDeps, request: HttpRequest) -> Result<Value> {
    Ok(deps.executor.send(request).await?.into_value())
}

struct HttpProxy {
    deps: Arc<ToolDeps>,
    method: Method,
}

#[async_trait]
impl ToolHandler for HttpProxy {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        let mut proxy = ProxyRequest::from_args(self.method.clone(), &args)?;
        let body = proxy.body.take().filter(|_| self.method == Method::POST);
        let config: ResolvedConfig = self.deps.resolver.resolve(AdapterFamily::Http, &args, ctx).await?;
        let mut request = proxy.into_request(config.get("base_url"), &config.headers, &BTreeMap::new())?;
        if let Some(body) = body {
            request = request.json(body);
        }
        pass_through(&self.deps, request).await
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    let mut get_params = proxy_params(false);
    get_params.push(ParamDef::optional("base_url", ParamType::String, "Overrides the record base URL"));
    let mut post_params = proxy_params(true);
    post_params.push(ParamDef::optional("base_url", ParamType::String, "Overrides the record base URL"));

    vec![
        ToolDescriptor::new(
            "http_get_json",
            "GET a JSON endpoint of a configured HTTP system",
            get_params,
            HttpProxy {
                deps: deps.clone(),
                method: Method::GET,
            },
        )
        .gated(),
        ToolDescriptor::new(
            "http_post_json",
            "POST a JSON body to a configured HTTP system",
            post_params,
            HttpProxy {
                deps,
                method: Method::POST,
            },
        )
        .gated(),
    ]
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{deps_with_env, spawn};
    use super::*;
    use crate::resolver::{ExternalSystemRecord, MapEnv};
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    fn echo_router() -> Router {
        Router::new()
            .route(
                "/v1/items",
                get(|headers: HeaderMap| async move {
                    Json(json!({
                        "key": headers.get("x-api-key").and_then(|v| v.to_str().ok()),
                    }))
                }),
            )
            .route("/v1/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
            .route(
                "/v1/raw",
                post(|headers: HeaderMap, body: String| async move {
                    Json(json!({
                        "raw": body,
                        "content_type": headers.get("content-type").and_then(|v| v.to_str().ok()),
                    }))
                }),
            )
            .route("/v1/plain", get(|| async { (axum::http::StatusCode::IM_A_TEAPOT, "short and stout") }))
    }

    #[tokio::test]
    async fn test_record_headers_overridden_by_call() {
        let base = spawn(echo_router()).await;
        let (deps, store) = deps_with_env(MapEnv::new());
        store
            .upsert_system(ExternalSystemRecord {
                name: "crm".to_string(),
                system_kind: "rest".to_string(),
                options: json!({"base_url": format!("{}/", base), "headers": {"X-Api-Key": "record"}}),
            })
            .await
            .unwrap();
        let ctx = CallContext::new().with_server("crm");
        let handler = HttpProxy { deps: deps.clone(), method: Method::GET };

        let out = handler.call(json!({"path": "/v1/items"}), &ctx).await.unwrap();
        assert_eq!(out["body"]["key"], "record");

        let out = handler
            .call(json!({"path": "/v1/items", "headers": {"x-api-key": "call"}}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["body"]["key"], "call");
    }

    #[tokio::test]
    async fn test_non_success_is_returned_not_raised() {
        let base = spawn(echo_router()).await;
        let (deps, _) = deps_with_env(MapEnv::new().with("HTTP_DEFAULT_BASE_URL", &base));
        let handler = HttpProxy { deps, method: Method::GET };

        let out = handler.call(json!({"path": "v1/plain"}), &CallContext::new()).await.unwrap();
        assert_eq!(out["ok"], false);
        assert_eq!(out["status"], 418);
        assert_eq!(out["body"], "short and stout");
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let base = spawn(echo_router()).await;
        let (deps, _) = deps_with_env(MapEnv::new());
        let handler = HttpProxy { deps, method: Method::POST };

        let out = handler
            .call(json!({"base_url": base, "path": "/v1/echo", "body": {"a": 1}}), &CallContext::new())
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["body"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_post_without_body_sends_nothing() {
        let base = spawn(echo_router()).await;
        let (deps, _) = deps_with_env(MapEnv::new());
        let handler = HttpProxy { deps, method: Method::POST };

        let out = handler
            .call(json!({"base_url": base, "path": "/v1/raw"}), &CallContext::new())
            .await
            .unwrap();
        assert_eq!(out["body"]["raw"], "");
        assert_eq!(out["body"]["content_type"], Value::Null);
    }

    #[tokio::test]
    async fn test_relative_path_without_base_rejected() {
        let (deps, _) = deps_with_env(MapEnv::new());
        let handler = HttpProxy { deps, method: Method::GET };
        let err = handler.call(json!({"path": "/x"}), &CallContext::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "base_url_required");
    }
}
