//! SQLite-backed store.
//!
//! One connection behind a mutex; every operation acquires it on a blocking
//! thread and releases it before returning. Transactions never outlive the
//! call that opened them.

use super::{Database, OAuthToken, Row, SqlValue, Statement, SystemStore, TokenStore};
use crate::resolver::ExternalSystemRecord;
use crate::types::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS external_systems (
    name TEXT PRIMARY KEY,
    system_kind TEXT NOT NULL,
    options TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS oauth_tokens (
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at TEXT,
    scope TEXT,
    PRIMARY KEY (user_id, provider)
);
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    user_id TEXT,
    title TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id);
CREATE INDEX IF NOT EXISTS idx_conversations_bot ON conversations(bot_id, updated_at);
"#;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::from(*v),
            SqlValue::Real(v) => ToSqlOutput::from(*v),
            SqlValue::Text(v) => ToSqlOutput::from(v.as_str()),
        })
    }
}

/// Store handle. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) and migrate.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// Non-persistent database, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::database("connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::internal(format!("blocking store task failed: {}", e)))?
    }

    /// Insert or replace a record (admin surface and seeding).
    pub async fn upsert_system(&self, record: ExternalSystemRecord) -> Result<()> {
        let options = match &record.options {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO external_systems (name, system_kind, options) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET system_kind = excluded.system_kind,
                                                 options = excluded.options",
                params![record.name, record.system_kind, options],
            )?;
            Ok(())
        })
        .await
    }

    /// Insert or replace the token for `(user_id, provider)`.
    pub async fn save_token(&self, token: OAuthToken) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO oauth_tokens (user_id, provider, access_token, refresh_token, expires_at, scope)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    scope = excluded.scope",
                params![
                    token.user_id,
                    token.provider,
                    token.access_token,
                    token.refresh_token,
                    token.expires_at.map(|t| t.to_rfc3339()),
                    token.scope,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(BASE64.encode(b)),
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
        }
        Ok(map)
    })?;
    let out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(out)
}

fn run_statements(tx: &rusqlite::Transaction<'_>, statements: &[Statement]) -> Result<Vec<u64>> {
    let mut affected = Vec::with_capacity(statements.len());
    for statement in statements {
        let n = tx.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
        if n == 0 {
            if let Some(code) = &statement.require_rows {
                return Err(Error::not_found(code.clone()));
            }
        }
        affected.push(n as u64);
    }
    Ok(affected)
}

#[async_trait]
impl Database for SqliteStore {
    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(n as u64)
        })
        .await
    }

    async fn transaction(&self, statements: Vec<Statement>) -> Result<Vec<u64>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            match run_statements(&tx, &statements) {
                Ok(affected) => {
                    tx.commit()?;
                    Ok(affected)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback() {
                        tracing::error!(error = %rollback_err, "transaction rollback failed");
                    }
                    tracing::debug!(error = %err, "transaction rolled back");
                    Err(err)
                }
            }
        })
        .await
    }
}

#[async_trait]
impl SystemStore for SqliteStore {
    async fn find_system(&self, name: &str) -> Result<Option<ExternalSystemRecord>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT name, system_kind, options FROM external_systems WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(name, system_kind, options)| ExternalSystemRecord {
                name,
                system_kind,
                // Left as raw text; parsed per family at resolution time.
                options: options.map_or(Value::Null, Value::String),
            }))
        })
        .await
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn find_token(&self, user_id: &str, provider: &str) -> Result<Option<OAuthToken>> {
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, provider, access_token, refresh_token, expires_at, scope
                     FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2",
                    params![user_id, provider],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(
                |(user_id, provider, access_token, refresh_token, expires_at, scope)| OAuthToken {
                    user_id,
                    provider,
                    access_token,
                    refresh_token,
                    expires_at: expires_at.as_deref().and_then(parse_timestamp),
                    scope,
                },
            ))
        })
        .await
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
