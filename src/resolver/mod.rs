//! Layered configuration resolution.
//!
//! Every adapter family resolves its fields through the same chain:
//!
//! 1. explicit call arguments (trimmed, empty = absent)
//! 2. the named record selected by `ctx.server_name`, when its kind matches
//! 3. process environment, then the family's vendor default
//!
//! A later tier never overrides a value from an earlier one. The result is
//! built fresh for every call and never cached.

pub mod env;
pub mod options;

pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use options::{
    AdapterFamily, ExternalSystemRecord, FieldSpec, SystemOptions, DHL_DEFAULT_BASE_URL,
    GOOGLE_DEFAULT_API_BASE_URL, STRIPE_DEFAULT_BASE_URL,
};

use crate::store::SystemStore;
use crate::tools::args::opt_str;
use crate::types::{CallContext, Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Normalized configuration for one call of one adapter family.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub family: AdapterFamily,
    values: BTreeMap<&'static str, String>,
    /// Default headers from the matched record (HTTP family only).
    pub headers: BTreeMap<String, String>,
    /// Name of the record that contributed, if any.
    pub record: Option<String>,
}

impl ResolvedConfig {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Field value or `ConfigMissing(family)`.
    pub fn require(&self, field: &str) -> Result<&str> {
        self.get(field)
            .ok_or_else(|| Error::config_missing(self.family.name()))
    }
}

/// Resolves adapter configuration from arguments, records and environment.
#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<dyn SystemStore>,
    env: Arc<dyn EnvSource>,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver").finish_non_exhaustive()
    }
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn SystemStore>, env: Arc<dyn EnvSource>) -> Self {
        Self { store, env }
    }

    pub async fn resolve(
        &self,
        family: AdapterFamily,
        args: &Value,
        ctx: &CallContext,
    ) -> Result<ResolvedConfig> {
        let fields = family.fields();
        let mut values: BTreeMap<&'static str, String> = BTreeMap::new();
        let mut headers = BTreeMap::new();
        let mut record_name = None;

        for spec in fields {
            if let Some(v) = opt_str(args, spec.name) {
                values.insert(spec.name, v);
            }
        }

        let any_absent = fields.iter().any(|f| !values.contains_key(f.name));
        if let Some(server) = &ctx.server_name {
            if any_absent || family.has_record_headers() {
                let record = self
                    .store
                    .find_system(server.as_str())
                    .await?
                    .ok_or_else(|| Error::not_found("server_not_found"))?;

                match SystemOptions::for_family(family, &record) {
                    Some(parsed) => {
                        let options = parsed?;
                        for spec in fields {
                            if values.contains_key(spec.name) {
                                continue;
                            }
                            if let Some(v) = options.field(spec.name) {
                                values.insert(spec.name, v);
                            } else if let Some(default) = spec.vendor_default {
                                values.insert(spec.name, default.to_string());
                            }
                        }
                        headers = options.headers();
                        record_name = Some(record.name);
                    }
                    None => {
                        tracing::debug!(
                            server = %server,
                            family = family.name(),
                            kind = %record.system_kind,
                            "record kind does not match family, skipped"
                        );
                    }
                }
            }
        }

        for spec in fields {
            if values.contains_key(spec.name) {
                continue;
            }
            let from_env = self
                .env
                .var(spec.env)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            if let Some(v) = from_env.or_else(|| spec.vendor_default.map(str::to_string)) {
                values.insert(spec.name, v);
            }
        }

        for spec in fields {
            if spec.required && !values.contains_key(spec.name) {
                tracing::debug!(family = family.name(), field = spec.name, "required field unresolved");
                return Err(Error::config_missing(family.name()));
            }
            if spec.is_url {
                if let Some(v) = values.get_mut(spec.name) {
                    strip_one_slash(v);
                }
            }
        }

        Ok(ResolvedConfig {
            family,
            values,
            headers,
            record: record_name,
        })
    }
}

fn strip_one_slash(url: &mut String) {
    if url.ends_with('/') {
        url.pop();
    }
}
