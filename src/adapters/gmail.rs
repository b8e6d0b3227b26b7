//! Gmail read-only tools.
//!
//! Listing fetches ids first, then each message's headers concurrently. A
//! header fetch that fails degrades to an empty placeholder at its position
//! and adds a diagnostic; it never fails the listing.

use super::ToolDeps;
use crate::executor::{join_url, HttpRequest};
use crate::fanout::{fan_out, Diagnostic};
use crate::identity::CallIdentity;
use crate::resolver::AdapterFamily;
use crate::tools::args::{opt_str, opt_u64, require_str};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_MAX_RESULTS: u64 = 10;
const MAX_RESULTS_LIMIT: u64 = 50;
const SUMMARY_HEADERS: [&str; 4] = ["Subject", "From", "To", "Date"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct MessageSummary {
    id: String,
    thread_id: String,
    subject: String,
    from: String,
    to: String,
    date: String,
    snippet: String,
}

impl MessageSummary {
    fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    fn from_message(message: &Value) -> Self {
        let header = |name: &str| header_value(message, name).unwrap_or_default();
        Self {
            id: str_at(message, "id"),
            thread_id: str_at(message, "threadId"),
            subject: header("Subject"),
            from: header("From"),
            to: header("To"),
            date: header("Date"),
            snippet: str_at(message, "snippet"),
        }
    }
}

fn str_at(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn header_value(message: &Value, name: &str) -> Option<String> {
    message
        .pointer("/payload/headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.get("value").and_then(Value::as_str))
        .map(str::to_string)
}

/// First `text/plain` part, depth-first.
fn plain_text(part: &Value) -> Option<String> {
    let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or_default();
    if mime.eq_ignore_ascii_case("text/plain") {
        let data = part.pointer("/body/data").and_then(Value::as_str)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(data.trim_end_matches('='))
            .or_else(|_| URL_SAFE.decode(data))
            .ok()?;
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }
    part.get("parts")?
        .as_array()?
        .iter()
        .find_map(plain_text)
}

fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[derive(Debug, Clone, Copy)]
enum GmailOp {
    ListMessages,
    GetMessage,
}

struct GmailTool {
    deps: Arc<ToolDeps>,
    op: GmailOp,
}

impl GmailTool {
    async fn list(&self, args: &Value, ctx: &CallContext) -> Result<Value> {
        let max_results = opt_u64(args, "max_results")?
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);
        let timeout_ms = opt_u64(args, "timeout_ms")?;
        let config = self.deps.resolver.resolve(AdapterFamily::Google, args, ctx).await?;
        let mailbox = opt_str(args, "mailbox");
        let identity = CallIdentity::new(&self.deps.identity, &config, ctx, mailbox.as_deref());
        let user = mailbox.as_deref().unwrap_or("me");
        let messages_url = join_url(
            config.require("api_base_url")?,
            &format!("gmail/v1/users/{}/messages", encode_segment(user)),
        );

        let mut request = HttpRequest::get(messages_url.as_str())
            .header("Authorization", identity.get().await?.bearer())
            .query("maxResults", max_results.to_string())
            .timeout_ms(timeout_ms);
        if let Some(q) = opt_str(args, "query") {
            request = request.query("q", q);
        }
        let listing = self.deps.executor.send_checked(request).await?.body;

        let ids: Vec<String> = listing
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(|m| str_at(m, "id")).filter(|id| !id.is_empty()).collect())
            .unwrap_or_default();

        let batch = ids.len();
        let results = fan_out(ids.clone(), batch, |id| {
            let identity = &identity;
            let messages_url = &messages_url;
            async move {
                let mut request = HttpRequest::get(format!("{}/{}", messages_url, encode_segment(&id)))
                    .header("Authorization", identity.get().await?.bearer())
                    .query("format", "metadata")
                    .timeout_ms(timeout_ms);
                for name in SUMMARY_HEADERS {
                    request.query.push(("metadataHeaders".to_string(), name.to_string()));
                }
                let response = self.deps.executor.send_checked(request).await?;
                Ok(MessageSummary::from_message(&response.body))
            }
        })
        .await;

        let mut messages = Vec::with_capacity(batch);
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(summary) => messages.push(summary),
                Err(diagnostic) => {
                    tracing::warn!(message_id = %id, error = %diagnostic.message, "message header fetch failed");
                    messages.push(MessageSummary::placeholder(id));
                    diagnostics.push(diagnostic);
                }
            }
        }

        Ok(json!({
            "messages": messages,
            "diagnostics": diagnostics,
            "result_size_estimate": listing.get("resultSizeEstimate").cloned().unwrap_or(Value::Null),
            "next_page_token": listing.get("nextPageToken").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn get(&self, args: &Value, ctx: &CallContext) -> Result<Value> {
        let message_id = require_str(args, "message_id", "message_id_required")?;
        let timeout_ms = opt_u64(args, "timeout_ms")?;
        let config = self.deps.resolver.resolve(AdapterFamily::Google, args, ctx).await?;
        let mailbox = opt_str(args, "mailbox");
        let identity = CallIdentity::new(&self.deps.identity, &config, ctx, mailbox.as_deref());
        let user = mailbox.as_deref().unwrap_or("me");

        let url = join_url(
            config.require("api_base_url")?,
            &format!(
                "gmail/v1/users/{}/messages/{}",
                encode_segment(user),
                encode_segment(&message_id)
            ),
        );
        let request = HttpRequest::get(url)
            .header("Authorization", identity.get().await?.bearer())
            .query("format", "full")
            .timeout_ms(timeout_ms);
        let message = self.deps.executor.send_checked(request).await?.body;

        let summary = MessageSummary::from_message(&message);
        let body = message
            .get("payload")
            .and_then(plain_text)
            .map(|text| self.deps.sanitizer.sanitize(&text))
            .unwrap_or_default();
        let labels = message.get("labelIds").cloned().unwrap_or_else(|| json!([]));

        let mut out = serde_json::to_value(summary)?;
        out["body_text"] = Value::String(body);
        out["labels"] = labels;
        Ok(out)
    }
}

#[async_trait]
impl ToolHandler for GmailTool {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        match self.op {
            GmailOp::ListMessages => self.list(&args, ctx).await,
            GmailOp::GetMessage => self.get(&args, ctx).await,
        }
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "gmail.list_messages",
            "List recent messages with subject, sender and date",
            vec![
                ParamDef::optional("query", ParamType::String, "Gmail search query"),
                ParamDef::optional("max_results", ParamType::Int, "Messages to return (max 50)"),
                ParamDef::optional("mailbox", ParamType::String, "Mailbox to read via delegation"),
                ParamDef::optional("timeout_ms", ParamType::Int, "Per-request timeout in milliseconds"),
            ],
            GmailTool { deps: deps.clone(), op: GmailOp::ListMessages },
        )
        .gated(),
        ToolDescriptor::new(
            "gmail.get_message",
            "Read one message including its plain-text body",
            vec![
                ParamDef::required("message_id", ParamType::String, "Gmail message id"),
                ParamDef::optional("mailbox", ParamType::String, "Mailbox to read via delegation"),
                ParamDef::optional("timeout_ms", ParamType::Int, "Request timeout in milliseconds"),
            ],
            GmailTool { deps, op: GmailOp::GetMessage },
        )
        .gated(),
    ]
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{deps_with_env, spawn};
    use super::*;
    use crate::resolver::MapEnv;
    use crate::store::OAuthToken;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    fn gmail() -> Router {
        Router::new()
            .route(
                "/gmail/v1/users/{user}/messages",
                get(|| async {
                    Json(json!({
                        "messages": [{"id": "m1"}, {"id": "broken"}, {"id": "m3"}],
                        "resultSizeEstimate": 3
                    }))
                }),
            )
            .route(
                "/gmail/v1/users/{user}/messages/{id}",
                get(|Path((_user, id)): Path<(String, String)>| async move {
                    if id == "broken" {
                        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "backend"})));
                    }
                    let body = URL_SAFE_NO_PAD.encode("hello <b>world</b>");
                    (
                        StatusCode::OK,
                        Json(json!({
                            "id": id,
                            "threadId": "t",
                            "snippet": "hello",
                            "payload": {
                                "mimeType": "multipart/alternative",
                                "headers": [{"name": "Subject", "value": format!("subject {}", id)}],
                                "parts": [{"mimeType": "text/plain", "body": {"data": body}}]
                            }
                        })),
                    )
                }),
            )
    }

    async fn gmail_deps() -> Arc<ToolDeps> {
        let base = spawn(gmail()).await;
        let (deps, store) = deps_with_env(MapEnv::new().with("GOOGLE_API_BASE_URL", &base));
        store
            .save_token(OAuthToken {
                user_id: "u1".to_string(),
                provider: "google".to_string(),
                access_token: "ya29.user".to_string(),
                refresh_token: None,
                expires_at: None,
                scope: None,
            })
            .await
            .unwrap();
        deps
    }

    #[tokio::test]
    async fn test_list_degrades_failed_items_in_place() {
        let deps = gmail_deps().await;
        let ctx = CallContext::new().with_user("u1");
        let out = GmailTool { deps, op: GmailOp::ListMessages }
            .call(json!({}), &ctx)
            .await
            .unwrap();

        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["subject"], "subject m1");
        assert_eq!(messages[1]["id"], "broken");
        assert_eq!(messages[1]["subject"], "");
        assert_eq!(messages[2]["subject"], "subject m3");
        assert_eq!(out["diagnostics"][0]["index"], 1);
    }

    #[tokio::test]
    async fn test_get_message_sanitizes_body() {
        let deps = gmail_deps().await;
        let ctx = CallContext::new().with_user("u1");
        let out = GmailTool { deps, op: GmailOp::GetMessage }
            .call(json!({"message_id": "m1"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["body_text"], "hello &lt;b&gt;world&lt;/b&gt;");
    }

    #[tokio::test]
    async fn test_no_identity_is_config_missing() {
        let (deps, _) = deps_with_env(MapEnv::new());
        let err = GmailTool { deps, op: GmailOp::ListMessages }
            .call(json!({}), &CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "config_missing: google");
    }
}
