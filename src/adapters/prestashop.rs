//! PrestaShop webservice proxies.
//!
//! The webservice key is sent as the basic-auth user with an empty
//! password. `output_format=JSON` is added unless the call asks otherwise.

use super::http::{pass_through, proxy_params, ProxyRequest};
use super::ToolDeps;
use crate::executor::{join_url, HttpRequest};
use crate::resolver::{AdapterFamily, ResolvedConfig};
use crate::tools::args::{opt_str, opt_u64, require_str};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

fn credentials(config: &ResolvedConfig) -> Result<BTreeMap<String, String>> {
    let key = config.require("api_key")?;
    let mut headers = BTreeMap::new();
    headers.insert(
        "Authorization".to_string(),
        format!("Basic {}", BASE64.encode(format!("{}:", key))),
    );
    Ok(headers)
}

#[derive(Debug, Clone, Copy)]
enum PrestashopOp {
    Get,
    GetOrder,
}

struct PrestashopTool {
    deps: Arc<ToolDeps>,
    op: PrestashopOp,
}

/// Arguments parsed before any resolution work.
enum PrestashopCall {
    Proxy(ProxyRequest),
    Order {
        id: u64,
        display: Option<String>,
        timeout_ms: Option<u64>,
    },
}

impl PrestashopCall {
    fn parse(op: PrestashopOp, args: &Value) -> Result<Self> {
        match op {
            PrestashopOp::Get => {
                let mut proxy = ProxyRequest::from_args(Method::GET, args)?;
                proxy
                    .query
                    .entry("output_format".to_string())
                    .or_insert_with(|| "JSON".to_string());
                Ok(Self::Proxy(proxy))
            }
            PrestashopOp::GetOrder => {
                let raw = require_str(args, "order_id", "order_id_required")?;
                let id = raw.parse().map_err(|_| Error::validation("order_id_invalid"))?;
                Ok(Self::Order {
                    id,
                    display: opt_str(args, "display"),
                    timeout_ms: opt_u64(args, "timeout_ms")?,
                })
            }
        }
    }
}

#[async_trait]
impl ToolHandler for PrestashopTool {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        let call = PrestashopCall::parse(self.op, &args)?;
        let config = self.deps.resolver.resolve(AdapterFamily::Prestashop, &args, ctx).await?;
        let auth = credentials(&config)?;
        let base = config.require("base_url")?;

        match call {
            PrestashopCall::Proxy(proxy) => {
                let request = proxy.into_request(Some(base), &config.headers, &auth)?;
                pass_through(&self.deps, request).await
            }
            PrestashopCall::Order { id, display, timeout_ms } => {
                let mut request = HttpRequest::get(join_url(base, &format!("orders/{}", id)))
                    .headers(&auth)
                    .query("output_format", "JSON")
                    .timeout_ms(timeout_ms);
                if let Some(display) = display {
                    request = request.query("display", display);
                }
                let response = self.deps.executor.send_checked(request).await?;
                Ok(response
                    .body
                    .get("order")
                    .cloned()
                    .unwrap_or(response.body))
            }
        }
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    let mut get_params = proxy_params(false);
    get_params.push(ParamDef::optional("api_key", ParamType::String, "Overrides the configured webservice key"));
    vec![
        ToolDescriptor::new(
            "prestashop.get",
            "GET any PrestaShop webservice resource",
            get_params,
            PrestashopTool { deps: deps.clone(), op: PrestashopOp::Get },
        )
        .gated(),
        ToolDescriptor::new(
            "prestashop.get_order",
            "Fetch one PrestaShop order by id",
            vec![
                ParamDef::required("order_id", ParamType::Int, "Order id"),
                ParamDef::optional("display", ParamType::String, "Field selection, e.g. full"),
                ParamDef::optional("api_key", ParamType::String, "Overrides the configured webservice key"),
                ParamDef::optional("timeout_ms", ParamType::Int, "Request timeout in milliseconds"),
            ],
            PrestashopTool { deps, op: PrestashopOp::GetOrder },
        )
        .gated(),
    ]
}
