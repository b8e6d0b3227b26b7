//! Shared argument helpers used by every adapter.
//!
//! Strings are trimmed and an empty string counts as absent.

use crate::types::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Optional string argument. Numbers are accepted and rendered as strings.
pub fn opt_str(args: &Value, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Required string argument; `code` is the error message when absent.
pub fn require_str(args: &Value, key: &str, code: &str) -> Result<String> {
    opt_str(args, key).ok_or_else(|| Error::validation(code))
}

/// Optional non-negative integer; numeric strings are accepted.
pub fn opt_u64(args: &Value, key: &str) -> Result<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::validation(format!("{}_invalid", key))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::validation(format!("{}_invalid", key))),
        Some(_) => Err(Error::validation(format!("{}_invalid", key))),
    }
}

/// Flat string map (headers, query). Scalars are stringified, nulls skipped.
pub fn string_map(args: &Value, key: &str) -> Result<BTreeMap<String, String>> {
    let Some(value) = args.get(key) else {
        return Ok(BTreeMap::new());
    };
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => Ok(map
            .iter()
            .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
            .collect()),
        _ => Err(Error::validation(format!("{}_must_be_object", key))),
    }
}

pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Server-side page window. `page` is 1-based; `page_size` is clamped to
/// `[1, max]` whatever the caller requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Page {
    pub fn from_args(args: &Value, default_size: u64, max_size: u64) -> Result<Self> {
        let page = opt_u64(args, "page")?.unwrap_or(1).max(1);
        let page_size = opt_u64(args, "page_size")?
            .unwrap_or(default_size)
            .clamp(1, max_size);
        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opt_str_trims_and_drops_empty() {
        let args = json!({"a": "  x ", "b": "   ", "c": 42, "d": true});
        assert_eq!(opt_str(&args, "a").as_deref(), Some("x"));
        assert_eq!(opt_str(&args, "b"), None);
        assert_eq!(opt_str(&args, "c").as_deref(), Some("42"));
        assert_eq!(opt_str(&args, "d"), None);
        assert_eq!(opt_str(&args, "missing"), None);
    }

    #[test]
    fn test_require_str_uses_code() {
        let err = require_str(&json!({}), "tracking_number", "tracking_number_required")
            .unwrap_err();
        assert_eq!(err.to_string(), "tracking_number_required");
    }

    #[test]
    fn test_opt_u64() {
        let args = json!({"a": 5, "b": "7", "c": -1, "d": "x"});
        assert_eq!(opt_u64(&args, "a").unwrap(), Some(5));
        assert_eq!(opt_u64(&args, "b").unwrap(), Some(7));
        assert!(opt_u64(&args, "c").is_err());
        assert!(opt_u64(&args, "d").is_err());
        assert_eq!(opt_u64(&args, "e").unwrap(), None);
    }

    #[test]
    fn test_string_map() {
        let args = json!({"headers": {"X-A": "1", "X-B": 2, "X-C": null}});
        let map = string_map(&args, "headers").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["X-B"], "2");
        assert!(string_map(&json!({"headers": "nope"}), "headers").is_err());
    }

    #[test]
    fn test_page_clamped() {
        let page = Page::from_args(&json!({"page": 0, "page_size": 10_000}), 20, 100).unwrap();
        assert_eq!(page, Page { page: 1, page_size: 100 });
        let page = Page::from_args(&json!({"page": 3}), 20, 100).unwrap();
        assert_eq!(page.offset(), 40);
    }
}
