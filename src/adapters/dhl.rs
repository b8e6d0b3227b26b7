//! DHL shipment tracking.

use super::ToolDeps;
use crate::executor::{join_url, HttpRequest};
use crate::resolver::AdapterFamily;
use crate::tools::args::{opt_str, opt_u64, require_str};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const TRACKING_PATH: &str = "track/shipments";
const DEFAULT_LANGUAGE: &str = "en";

struct TrackShipment {
    deps: Arc<ToolDeps>,
}

#[async_trait]
impl ToolHandler for TrackShipment {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        let tracking_number = require_str(&args, "tracking_number", "tracking_number_required")?;
        let timeout_ms = opt_u64(&args, "timeout_ms")?;
        let config = self.deps.resolver.resolve(AdapterFamily::Dhl, &args, ctx).await?;

        let mut request = HttpRequest::get(join_url(config.require("base_url")?, TRACKING_PATH))
            .header("DHL-API-Key", config.require("api_key")?)
            .header("Accept", "application/json")
            .query("trackingNumber", tracking_number.as_str())
            .query(
                "language",
                opt_str(&args, "language").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            )
            .timeout_ms(timeout_ms);
        if let Some(service) = opt_str(&args, "service") {
            request = request.query("service", service);
        }

        let response = self.deps.executor.send_checked(request).await?;
        let shipments = response
            .body
            .get("shipments")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(json!({
            "tracking_number": tracking_number,
            "shipments": shipments,
        }))
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    vec![ToolDescriptor::new(
        "dhl.track_shipment",
        "Track a DHL shipment by tracking number",
        vec![
            ParamDef::required("tracking_number", ParamType::String, "DHL tracking number"),
            ParamDef::optional("language", ParamType::String, "Response language (default en)"),
            ParamDef::optional(
                "service",
                ParamType::Enum(
                    ["express", "parcel-de", "ecommerce", "dgf", "freight", "post-de"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                "Restrict to one DHL service",
            ),
            ParamDef::optional("api_key", ParamType::String, "Overrides the configured API key"),
            ParamDef::optional("base_url", ParamType::String, "Overrides the configured API host"),
            ParamDef::optional("timeout_ms", ParamType::Int, "Request timeout in milliseconds"),
        ],
        TrackShipment { deps },
    )]
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{deps_with_env, spawn};
    use super::*;
    use crate::resolver::MapEnv;
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_missing_tracking_number() {
        let (deps, _) = deps_with_env(MapEnv::new());
        let err = TrackShipment { deps }
            .call(json!({"tracking_number": "  "}), &CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "tracking_number_required");
    }

    #[tokio::test]
    async fn test_tracks_with_key_header_and_language() {
        let app = Router::new().route(
            "/track/shipments",
            get(|Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                let key = headers.get("dhl-api-key").and_then(|v| v.to_str().ok()).unwrap_or_default();
                Json(json!({
                    "shipments": [{
                        "id": q.get("trackingNumber"),
                        "language": q.get("language"),
                        "key": key,
                    }]
                }))
            }),
        );
        let base = spawn(app).await;
        let (deps, _) = deps_with_env(
            MapEnv::new().with("DHL_API_KEY", "dhl-key").with("DHL_API_BASE", &format!("{}/", base)),
        );

        let out = TrackShipment { deps }
            .call(json!({"tracking_number": "00340434292135100186"}), &CallContext::new())
            .await
            .unwrap();
        assert_eq!(out["shipments"][0]["id"], "00340434292135100186");
        assert_eq!(out["shipments"][0]["language"], "en");
        assert_eq!(out["shipments"][0]["key"], "dhl-key");
    }

    #[tokio::test]
    async fn test_requested_timeout_raised_to_floor() {
        let app = Router::new().route(
            "/track/shipments",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                Json(json!({"shipments": []}))
            }),
        );
        let base = spawn(app).await;
        let (deps, _) = deps_with_env(MapEnv::new().with("DHL_API_KEY", "dhl-key").with("DHL_API_BASE", &base));

        let start = std::time::Instant::now();
        let err = TrackShipment { deps }
            .call(json!({"tracking_number": "1", "timeout_ms": 1}), &CallContext::new())
            .await
            .unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, crate::types::Error::Timeout(_)), "{err:?}");
        assert_eq!(err.to_string(), "timeout: 100 ms");
        assert!(elapsed >= std::time::Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed < std::time::Duration::from_millis(500), "{elapsed:?}");
    }
}
