//! Outbound HTTP with bounded, cancellable timeouts.
//!
//! Every request runs under its own cancellation token, armed by a timer set
//! to the effective timeout. Cancellation surfaces as [`Error::Timeout`];
//! transport failures as [`Error::Network`]. [`RequestExecutor::send`] passes
//! any status through; [`RequestExecutor::send_checked`] turns non-2xx into
//! [`Error::UpstreamHttp`].

use crate::types::{Error, ExecutorConfig, Result, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Requested (or default) timeout clamped to `[MIN_TIMEOUT_MS, MAX_TIMEOUT_MS]`.
pub fn effective_timeout_ms(requested: Option<u64>, default_ms: u64) -> u64 {
    requested
        .unwrap_or(default_ms)
        .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// Join a base URL and a path with exactly one slash between them.
/// Absolute `http(s)://` paths are returned unchanged.
pub fn join_url(base: &str, path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout_ms: Option<u64>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            timeout_ms: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Merge `headers` over the current set. Names compare case-insensitively;
    /// the incoming value wins.
    pub fn headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.query.retain(|(k, _)| *k != key);
        self.query.push((key, value.into()));
        self
    }

    pub fn query_map(mut self, query: &BTreeMap<String, String>) -> Self {
        for (k, v) in query {
            self = self.query(k.clone(), v.clone());
        }
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Pass-through response. `body` is parsed JSON when the payload parses,
/// otherwise the raw text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpResponse {
    pub ok: bool,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl HttpResponse {
    pub fn into_value(self) -> Value {
        serde_json::json!({
            "ok": self.ok,
            "status": self.status,
            "headers": self.headers,
            "body": self.body,
        })
    }
}

/// Shared outbound client.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    default_timeout_ms: u64,
    error_body_bytes: usize,
    max_response_bytes: usize,
}

impl RequestExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if let Ok(ua) = config.user_agent.parse() {
            default_headers.insert(USER_AGENT, ua);
        }
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            default_timeout_ms: config.default_timeout_ms,
            error_body_bytes: config.error_body_bytes,
            max_response_bytes: config.max_response_bytes,
        })
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    /// Send and return the response whatever its status.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// As [`send`](Self::send), also aborting when `parent` is cancelled.
    pub async fn send_with_cancel(
        &self,
        request: HttpRequest,
        parent: &CancellationToken,
    ) -> Result<HttpResponse> {
        let timeout_ms = effective_timeout_ms(request.timeout_ms, self.default_timeout_ms);
        let method = request.method.clone();
        let url = validate_url(&request.url)?;
        let host = url.host_str().unwrap_or_default().to_string();

        let token = parent.child_token();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                token.cancel();
            })
        };

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(Error::timeout(format!("{} ms", timeout_ms))),
            result = self.execute(url, request) => result,
        };
        timer.abort();

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(resp) => tracing::debug!(
                %method,
                host = %host,
                status = resp.status,
                elapsed_ms,
                "outbound request completed"
            ),
            Err(err) => tracing::warn!(
                %method,
                host = %host,
                error = %err,
                elapsed_ms,
                "outbound request failed"
            ),
        }
        outcome
    }

    /// Send; non-2xx becomes `UpstreamHttp(status, message)`.
    pub async fn send_checked(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.send(request).await?;
        if response.ok {
            Ok(response)
        } else {
            Err(Error::upstream(
                response.status,
                upstream_message(&response.body, self.error_body_bytes),
            ))
        }
    }

    async fn execute(&self, url: Url, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Form(pairs)) => builder.form(&pairs),
            None => builder,
        };

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let bytes = read_limited(response, self.max_response_bytes).await?;

        Ok(HttpResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            headers,
            body: parse_body(&bytes),
        })
    }
}

/// Read the body chunk by chunk, failing once it exceeds `max_bytes`.
async fn read_limited(mut response: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>> {
    let max_bytes_u64 = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if response.content_length().is_some_and(|len| len > max_bytes_u64) {
        return Err(Error::network("response_too_large"));
    }
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_transport_error)? {
        if buf.len() + chunk.len() > max_bytes {
            return Err(Error::network("response_too_large"));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|_| Error::validation("invalid_url"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(Error::validation("invalid_url")),
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(err.to_string())
    } else if err.is_builder() {
        Error::validation(format!("invalid_request: {}", err))
    } else {
        Error::network(err.to_string())
    }
}

/// JSON when the payload parses, text otherwise, null when empty.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Short message for an upstream failure: the `errors` or `error` field when
/// present, otherwise the leading `limit` bytes of the body.
pub fn upstream_message(body: &Value, limit: usize) -> String {
    if let Some(obj) = body.as_object() {
        if let Some(errors) = obj.get("errors") {
            let text = match errors {
                Value::Array(items) => items
                    .iter()
                    .map(describe_error_item)
                    .collect::<Vec<_>>()
                    .join("; "),
                other => describe_error_item(other),
            };
            if !text.is_empty() {
                return truncate_utf8(&text, limit);
            }
        }
        if let Some(error) = obj.get("error") {
            return truncate_utf8(&describe_error_item(error), limit);
        }
    }
    let text = match body {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    truncate_utf8(&text, limit)
}

fn describe_error_item(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["message", "detail", "title"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| item.to_string()),
        other => other.to_string(),
    }
}

/// Cut to at most `limit` bytes without splitting a character.
pub fn truncate_utf8(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use proptest::prelude::*;
    use serde_json::json;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn executor() -> RequestExecutor {
        RequestExecutor::new(&ExecutorConfig::default()).unwrap()
    }

    #[test]
    fn test_timeout_clamped_at_both_ends() {
        assert_eq!(effective_timeout_ms(Some(120_000), 15_000), 60_000);
        assert_eq!(effective_timeout_ms(Some(10), 15_000), 100);
        assert_eq!(effective_timeout_ms(None, 15_000), 15_000);
    }

    proptest! {
        #[test]
        fn prop_effective_timeout_in_bounds(requested in proptest::option::of(any::<u64>()), default in any::<u64>()) {
            let t = effective_timeout_ms(requested, default);
            prop_assert!((MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&t));
        }
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.test/", "/v1/x"), "https://a.test/v1/x");
        assert_eq!(join_url("https://a.test", "v1"), "https://a.test/v1");
        assert_eq!(join_url("https://a.test", "https://b.test/y"), "https://b.test/y");
        assert_eq!(join_url("https://a.test/", ""), "https://a.test");
    }

    #[test]
    fn test_upstream_message_prefers_error_fields() {
        let body = json!({"error": {"message": "No such payment_intent", "type": "invalid_request_error"}});
        assert_eq!(upstream_message(&body, 500), "No such payment_intent");

        let body = json!({"errors": [{"message": "bad id"}, "other"]});
        assert_eq!(upstream_message(&body, 500), "bad id; other");

        let body = json!({"title": "Not Found", "detail": "No shipment"});
        assert!(upstream_message(&body, 500).contains("No shipment"));
    }

    #[test]
    fn test_upstream_message_truncates_on_char_boundary() {
        let body = Value::String("é".repeat(400));
        let msg = upstream_message(&body, 501);
        assert_eq!(msg.len(), 500);
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(b"{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_body(b"<html>"), json!("<html>"));
    }

    #[tokio::test]
    async fn test_send_passes_non_success_through() {
        let base = spawn(Router::new().route(
            "/missing",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
        ))
        .await;

        let resp = executor().send(HttpRequest::get(format!("{}/missing", base))).await.unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, json!("nope"));
    }

    #[tokio::test]
    async fn test_send_checked_maps_upstream_error() {
        let base = spawn(Router::new().route(
            "/fail",
            get(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    axum::Json(json!({"error": "boom"})),
                )
            }),
        ))
        .await;

        let err = executor()
            .send_checked(HttpRequest::get(format!("{}/fail", base)))
            .await
            .unwrap_err();
        assert_eq!(err.upstream_status(), Some(400));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let base = spawn(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;

        let err = executor()
            .send(HttpRequest::get(format!("{}/slow", base)).timeout_ms(Some(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_parent_cancellation_aborts() {
        let base = spawn(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;

        let parent = CancellationToken::new();
        parent.cancel();
        let err = executor()
            .send_with_cancel(HttpRequest::get(format!("{}/slow", base)), &parent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    fn capped_executor(max_response_bytes: usize) -> RequestExecutor {
        RequestExecutor::new(&ExecutorConfig {
            max_response_bytes,
            ..ExecutorConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let base = spawn(
            Router::new()
                .route("/big", get(|| async { "x".repeat(4096) }))
                .route(
                    "/streamed",
                    get(|| async {
                        let chunks = (0..8).map(|_| {
                            Ok::<_, std::io::Error>(axum::body::Bytes::from(vec![b'y'; 1024]))
                        });
                        axum::body::Body::from_stream(futures::stream::iter(chunks))
                    }),
                )
                .route("/small", get(|| async { "fits" })),
        )
        .await;
        let exec = capped_executor(2048);

        for path in ["big", "streamed"] {
            let err = exec
                .send(HttpRequest::get(format!("{}/{}", base, path)))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Network(_)), "{path}: {err:?}");
            assert_eq!(err.to_string(), "network_error: response_too_large");
        }

        let resp = exec.send(HttpRequest::get(format!("{}/small", base))).await.unwrap();
        assert_eq!(resp.body, json!("fits"));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let err = executor().send(HttpRequest::get("ftp://x")).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid_url");
    }

    #[test]
    fn test_header_merge_is_case_insensitive() {
        let mut extra = BTreeMap::new();
        extra.insert("authorization".to_string(), "Bearer b".to_string());
        let req = HttpRequest::get("https://x")
            .header("Authorization", "Bearer a")
            .headers(&extra);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers["authorization"], "Bearer b");
    }
}
