//! Stripe proxies. Requests authenticate with `Authorization: Bearer
//! <secret_key>` unless the call supplies its own `Authorization` header.
//! POST bodies are form-encoded with bracketed keys for nesting.

use super::http::{pass_through, proxy_params, ProxyRequest};
use super::ToolDeps;
use crate::executor::{join_url, HttpRequest};
use crate::resolver::{AdapterFamily, ResolvedConfig};
use crate::tools::args::{opt_u64, require_str, scalar_to_string};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum StripeOp {
    Get,
    Post,
    GetPaymentIntent,
}

struct StripeTool {
    deps: Arc<ToolDeps>,
    op: StripeOp,
}

fn credentials(config: &ResolvedConfig) -> Result<BTreeMap<String, String>> {
    let secret = config.require("secret_key")?;
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), format!("Bearer {}", secret));
    Ok(headers)
}

/// Flatten a JSON object into Stripe's `a[b][0]=v` form encoding.
fn form_pairs(body: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let key = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{}[{}]", prefix, k)
                    };
                    walk(&key, v, out);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    walk(&format!("{}[{}]", prefix, i), v, out);
                }
            }
            Value::Null => {}
            scalar => {
                if let Some(s) = scalar_to_string(scalar) {
                    out.push((prefix.to_string(), s));
                }
            }
        }
    }
    let mut out = Vec::new();
    walk("", body, &mut out);
    out
}

fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Arguments parsed before any resolution work.
enum StripeCall {
    Proxy(ProxyRequest),
    Form(ProxyRequest, Vec<(String, String)>),
    PaymentIntent { id: String, timeout_ms: Option<u64> },
}

impl StripeCall {
    fn parse(op: StripeOp, args: &Value) -> Result<Self> {
        match op {
            StripeOp::Get => Ok(Self::Proxy(ProxyRequest::from_args(Method::GET, args)?)),
            StripeOp::Post => {
                let proxy = ProxyRequest::from_args(Method::POST, args)?;
                let pairs = match &proxy.body {
                    None => Vec::new(),
                    Some(body @ Value::Object(_)) => form_pairs(body),
                    Some(_) => return Err(Error::validation("body_must_be_object")),
                };
                Ok(Self::Form(proxy, pairs))
            }
            StripeOp::GetPaymentIntent => Ok(Self::PaymentIntent {
                id: require_str(args, "payment_intent_id", "payment_intent_id_required")?,
                timeout_ms: opt_u64(args, "timeout_ms")?,
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for StripeTool {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        let call = StripeCall::parse(self.op, &args)?;
        let config = self.deps.resolver.resolve(AdapterFamily::Stripe, &args, ctx).await?;
        let auth = credentials(&config)?;
        let base = config.require("base_url")?;

        match call {
            StripeCall::Proxy(proxy) => {
                let request = proxy.into_request(Some(base), &config.headers, &auth)?;
                pass_through(&self.deps, request).await
            }
            StripeCall::Form(proxy, pairs) => {
                let request = proxy
                    .into_request(Some(base), &config.headers, &auth)?
                    .form(pairs);
                pass_through(&self.deps, request).await
            }
            StripeCall::PaymentIntent { id, timeout_ms } => {
                let url = join_url(base, &format!("v1/payment_intents/{}", encode_segment(&id)));
                let request = HttpRequest::get(url).headers(&auth).timeout_ms(timeout_ms);
                let response = self.deps.executor.send_checked(request).await?;
                Ok(response.body)
            }
        }
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    let with_secret = |mut params: Vec<ParamDef>| {
        params.push(ParamDef::optional("secret_key", ParamType::String, "Overrides the configured secret key"));
        params
    };
    vec![
        ToolDescriptor::new(
            "stripe.get",
            "GET any Stripe API path",
            with_secret(proxy_params(false)),
            StripeTool { deps: deps.clone(), op: StripeOp::Get },
        )
        .gated(),
        ToolDescriptor::new(
            "stripe.post",
            "POST a form-encoded body to a Stripe API path",
            with_secret(proxy_params(true)),
            StripeTool { deps: deps.clone(), op: StripeOp::Post },
        )
        .gated(),
        ToolDescriptor::new(
            "stripe.get_payment_intent",
            "Fetch one payment intent by id",
            with_secret(vec![
                ParamDef::required("payment_intent_id", ParamType::String, "Payment intent id (pi_...)"),
                ParamDef::optional("timeout_ms", ParamType::Int, "Request timeout in milliseconds"),
            ]),
            StripeTool { deps, op: StripeOp::GetPaymentIntent },
        )
        .gated(),
    ]
}
