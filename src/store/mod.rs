//! Persisted-store collaborators consumed by the core.
//!
//! The registry never owns a store: adapters receive these traits through
//! [`ToolDeps`](crate::adapters::ToolDeps). SQL text is an adapter detail;
//! every untrusted value travels as a bound [`SqlValue`].

mod sqlite;

pub use sqlite::SqliteStore;

use crate::resolver::ExternalSystemRecord;
use crate::types::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row, column name → JSON value.
pub type Row = Map<String, Value>;

/// Bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// One statement of a transactional batch.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Fail the batch with `NotFound(code)` when no row is affected.
    pub require_rows: Option<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
            require_rows: None,
        }
    }

    pub fn require_rows(mut self, code: &str) -> Self {
        self.require_rows = Some(code.to_string());
        self
    }
}

/// Parameterized-query executor against the persisted store.
#[async_trait]
pub trait Database: Send + Sync {
    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>>;

    /// Returns the number of affected rows.
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64>;

    /// Run every statement inside one transaction. Commits only after all
    /// succeed; any failure rolls the whole batch back.
    async fn transaction(&self, statements: Vec<Statement>) -> Result<Vec<u64>>;
}

/// Lookup of named external-system records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemStore: Send + Sync {
    async fn find_system(&self, name: &str) -> Result<Option<ExternalSystemRecord>>;
}

/// OAuth tokens persisted per platform user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl OAuthToken {
    /// Usable if non-empty and not expiring within `skew_secs`.
    pub fn is_usable(&self, now: DateTime<Utc>, skew_secs: i64) -> bool {
        if self.access_token.trim().is_empty() {
            return false;
        }
        self.expires_at
            .map_or(true, |exp| exp > now + chrono::Duration::seconds(skew_secs))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_token(&self, user_id: &str, provider: &str) -> Result<Option<OAuthToken>>;
}
