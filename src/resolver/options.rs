//! Typed options for persisted external-system records.
//!
//! A record's `options` bag is parsed at the boundary into one struct per
//! adapter family, chosen by matching the record's `system_kind` against the
//! family's markers. Each struct names a single canonical key per field.
//! Legacy alias keys are ignored (and logged) rather than resolved.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persisted, named configuration row. Read-only from the resolver's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSystemRecord {
    pub name: String,
    pub system_kind: String,
    #[serde(default)]
    pub options: Value,
}

/// Adapter families sharing one resolution recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterFamily {
    Http,
    Stripe,
    Dhl,
    Prestashop,
    Google,
}

/// Hardcoded DHL API host used when a DHL record configures none.
pub const DHL_DEFAULT_BASE_URL: &str = "https://api-eu.dhl.com";
pub const STRIPE_DEFAULT_BASE_URL: &str = "https://api.stripe.com";
pub const GOOGLE_DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com";

/// One resolvable string field of a family.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Canonical key, used for call arguments and record options alike.
    pub name: &'static str,
    /// Process-level fallback variable.
    pub env: &'static str,
    pub required: bool,
    /// Value implied by a matching record that leaves the field unset; also
    /// the last resort after the environment.
    pub vendor_default: Option<&'static str>,
    /// Strip one trailing slash.
    pub is_url: bool,
}

const fn field(name: &'static str, env: &'static str, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        env,
        required,
        vendor_default: None,
        is_url: false,
    }
}

const fn url_field(
    name: &'static str,
    env: &'static str,
    required: bool,
    vendor_default: Option<&'static str>,
) -> FieldSpec {
    FieldSpec {
        name,
        env,
        required,
        vendor_default,
        is_url: true,
    }
}

const HTTP_FIELDS: &[FieldSpec] = &[url_field("base_url", "HTTP_DEFAULT_BASE_URL", false, None)];

const STRIPE_FIELDS: &[FieldSpec] = &[
    field("secret_key", "STRIPE_SECRET_KEY", true),
    url_field("base_url", "STRIPE_API_BASE", true, Some(STRIPE_DEFAULT_BASE_URL)),
];

const DHL_FIELDS: &[FieldSpec] = &[
    field("api_key", "DHL_API_KEY", true),
    url_field("base_url", "DHL_API_BASE", true, Some(DHL_DEFAULT_BASE_URL)),
];

const PRESTASHOP_FIELDS: &[FieldSpec] = &[
    url_field("base_url", "PRESTASHOP_BASE_URL", true, None),
    field("api_key", "PRESTASHOP_API_KEY", true),
];

const GOOGLE_FIELDS: &[FieldSpec] = &[
    field("service_account_json", "GOOGLE_SERVICE_ACCOUNT_JSON", false),
    field("delegated_user", "GOOGLE_DELEGATED_USER", false),
    url_field(
        "api_base_url",
        "GOOGLE_API_BASE_URL",
        true,
        Some(GOOGLE_DEFAULT_API_BASE_URL),
    ),
];

impl AdapterFamily {
    pub fn name(self) -> &'static str {
        match self {
            AdapterFamily::Http => "http",
            AdapterFamily::Stripe => "stripe",
            AdapterFamily::Dhl => "dhl",
            AdapterFamily::Prestashop => "prestashop",
            AdapterFamily::Google => "google",
        }
    }

    /// Lowercase substrings identifying a matching `system_kind`.
    pub fn kind_markers(self) -> &'static [&'static str] {
        match self {
            AdapterFamily::Http => &["http", "rest", "api"],
            AdapterFamily::Stripe => &["stripe"],
            AdapterFamily::Dhl => &["dhl"],
            AdapterFamily::Prestashop => &["prestashop", "presta"],
            AdapterFamily::Google => &["google", "gmail"],
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            AdapterFamily::Http => HTTP_FIELDS,
            AdapterFamily::Stripe => STRIPE_FIELDS,
            AdapterFamily::Dhl => DHL_FIELDS,
            AdapterFamily::Prestashop => PRESTASHOP_FIELDS,
            AdapterFamily::Google => GOOGLE_FIELDS,
        }
    }

    /// Families whose records carry default headers always need the record.
    pub fn has_record_headers(self) -> bool {
        matches!(self, AdapterFamily::Http)
    }

    /// Case-insensitive substring match on the record kind.
    pub fn matches(self, system_kind: &str) -> bool {
        let kind = system_kind.to_ascii_lowercase();
        self.kind_markers().iter().any(|m| kind.contains(m))
    }

    fn legacy_aliases(self) -> &'static [&'static str] {
        match self {
            AdapterFamily::Http => &["api_base", "api_base_url", "url", "default_headers"],
            AdapterFamily::Stripe => &["api_key", "stripe_secret_key", "sk", "api_base"],
            AdapterFamily::Dhl => &["apiKey", "dhl_api_key", "api_base", "api_base_url", "host"],
            AdapterFamily::Prestashop => &["ws_key", "webservice_key", "api_base", "shop_url"],
            AdapterFamily::Google => &["credentials", "service_account", "impersonate"],
        }
    }
}

// =============================================================================
// Per-family option structs
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StripeOptions {
    pub secret_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DhlOptions {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrestashopOptions {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GoogleOptions {
    /// Either the key file as a JSON string or the key object itself.
    pub service_account_json: Option<Value>,
    pub delegated_user: Option<String>,
    pub api_base_url: Option<String>,
}

/// Record options, tagged by the family the record's kind selected.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemOptions {
    Http(HttpOptions),
    Stripe(StripeOptions),
    Dhl(DhlOptions),
    Prestashop(PrestashopOptions),
    Google(GoogleOptions),
}

impl SystemOptions {
    /// Parse `record` for `family`. `None` when the kind does not match.
    pub fn for_family(family: AdapterFamily, record: &ExternalSystemRecord) -> Option<Result<Self>> {
        if !family.matches(&record.system_kind) {
            return None;
        }
        Some(Self::parse(family, record))
    }

    fn parse(family: AdapterFamily, record: &ExternalSystemRecord) -> Result<Self> {
        let bag = normalize_bag(&record.options)?;
        warn_legacy_aliases(family, record, &bag);
        let options = match family {
            AdapterFamily::Http => SystemOptions::Http(serde_json::from_value(bag)?),
            AdapterFamily::Stripe => SystemOptions::Stripe(serde_json::from_value(bag)?),
            AdapterFamily::Dhl => SystemOptions::Dhl(serde_json::from_value(bag)?),
            AdapterFamily::Prestashop => SystemOptions::Prestashop(serde_json::from_value(bag)?),
            AdapterFamily::Google => SystemOptions::Google(serde_json::from_value(bag)?),
        };
        Ok(options)
    }

    /// Canonical field value, if set.
    pub fn field(&self, name: &str) -> Option<String> {
        let raw = match (self, name) {
            (SystemOptions::Http(o), "base_url") => o.base_url.clone(),
            (SystemOptions::Stripe(o), "secret_key") => o.secret_key.clone(),
            (SystemOptions::Stripe(o), "base_url") => o.base_url.clone(),
            (SystemOptions::Dhl(o), "api_key") => o.api_key.clone(),
            (SystemOptions::Dhl(o), "base_url") => o.base_url.clone(),
            (SystemOptions::Prestashop(o), "base_url") => o.base_url.clone(),
            (SystemOptions::Prestashop(o), "api_key") => o.api_key.clone(),
            (SystemOptions::Google(o), "service_account_json") => {
                o.service_account_json.as_ref().map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
            (SystemOptions::Google(o), "delegated_user") => o.delegated_user.clone(),
            (SystemOptions::Google(o), "api_base_url") => o.api_base_url.clone(),
            _ => None,
        };
        raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    /// Default headers configured on the record.
    pub fn headers(&self) -> BTreeMap<String, String> {
        match self {
            SystemOptions::Http(o) => o.headers.clone(),
            _ => BTreeMap::new(),
        }
    }
}

/// Options may be persisted as a JSON object or as a JSON-encoded string.
fn normalize_bag(options: &Value) -> Result<Value> {
    match options {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::Object(_) => Ok(options.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s)?;
            if parsed.is_object() {
                Ok(parsed)
            } else {
                Err(Error::validation("server_options_invalid"))
            }
        }
        _ => Err(Error::validation("server_options_invalid")),
    }
}

fn warn_legacy_aliases(family: AdapterFamily, record: &ExternalSystemRecord, bag: &Value) {
    let Some(map) = bag.as_object() else {
        return;
    };
    let canonical: Vec<&str> = family.fields().iter().map(|f| f.name).collect();
    for alias in family.legacy_aliases() {
        if map.contains_key(*alias) && !canonical.contains(alias) {
            tracing::warn!(
                server = %record.name,
                family = family.name(),
                key = %alias,
                "ignoring legacy option key; use the canonical key instead"
            );
        }
    }
}
