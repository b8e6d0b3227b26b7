//! Conversation store tools.
//!
//! Filters come from a fixed key set and every value is a bound parameter.
//! Page sizes are clamped here whatever the caller asks for. Mutations run
//! as one transaction and publish a `conversation.*` event after commit.

use super::ToolDeps;
use crate::store::{SqlValue, Statement};
use crate::tools::args::{opt_str, opt_u64, require_str, Page};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;
pub const DEFAULT_MESSAGE_LIMIT: u64 = 100;
pub const MAX_MESSAGE_LIMIT: u64 = 500;

const ROLES: [&str; 3] = ["user", "assistant", "system"];

/// WHERE clause and parameters for the list filters.
#[derive(Debug, Default)]
struct Filter {
    clauses: Vec<&'static str>,
    params: Vec<SqlValue>,
}

impl Filter {
    fn from_args(args: &Value, ctx: &CallContext) -> Self {
        let mut filter = Filter::default();
        let bot_id = opt_str(args, "bot_id").or_else(|| ctx.bot_id.as_ref().map(|b| b.to_string()));
        if let Some(bot_id) = bot_id {
            filter.push("bot_id = ?", bot_id);
        }
        if let Some(user_id) = opt_str(args, "user_id") {
            filter.push("user_id = ?", user_id);
        }
        if let Some(status) = opt_str(args, "status") {
            filter.push("status = ?", status);
        }
        if let Some(search) = opt_str(args, "search") {
            filter.push("title LIKE ? ESCAPE '\\'", format!("%{}%", escape_like(&search)));
        }
        filter
    }

    fn push(&mut self, clause: &'static str, value: impl Into<SqlValue>) {
        self.clauses.push(clause);
        self.params.push(value.into());
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy)]
enum ConversationOp {
    List,
    Get,
    AppendMessage,
    Delete,
    RawQuery,
}

struct ConversationTool {
    deps: Arc<ToolDeps>,
    op: ConversationOp,
}

impl ConversationTool {
    async fn list(&self, args: &Value, ctx: &CallContext) -> Result<Value> {
        let page = Page::from_args(args, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE)?;
        let filter = Filter::from_args(args, ctx);
        let where_sql = filter.where_sql();

        let mut params = filter.params.clone();
        params.push(SqlValue::Integer(to_i64(page.page_size)));
        params.push(SqlValue::Integer(to_i64(page.offset())));
        let items = self
            .deps
            .db
            .query(
                &format!(
                    "SELECT id, bot_id, user_id, title, status, message_count, created_at, updated_at \
                     FROM conversations{} ORDER BY updated_at DESC, id LIMIT ? OFFSET ?",
                    where_sql
                ),
                params,
            )
            .await?;

        let count = self
            .deps
            .db
            .query(
                &format!("SELECT COUNT(*) AS total FROM conversations{}", where_sql),
                filter.params,
            )
            .await?;
        let total = count
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Ok(json!({
            "items": items,
            "total": total,
            "page": page.page,
            "page_size": page.page_size,
        }))
    }

    async fn get(&self, args: &Value) -> Result<Value> {
        let id = require_str(args, "conversation_id", "conversation_id_required")?;
        let limit = opt_u64(args, "limit")?
            .unwrap_or(DEFAULT_MESSAGE_LIMIT)
            .clamp(1, MAX_MESSAGE_LIMIT);

        let mut rows = self
            .deps
            .db
            .query(
                "SELECT id, bot_id, user_id, title, status, message_count, created_at, updated_at \
                 FROM conversations WHERE id = ?",
                vec![id.clone().into()],
            )
            .await?;
        if rows.is_empty() {
            return Err(Error::not_found("conversation_not_found"));
        }
        let conversation = rows.swap_remove(0);

        let messages = self
            .deps
            .db
            .query(
                "SELECT id, role, content, created_at FROM messages \
                 WHERE conversation_id = ? ORDER BY id LIMIT ?",
                vec![id.into(), SqlValue::Integer(to_i64(limit))],
            )
            .await?;

        Ok(json!({
            "conversation": conversation,
            "messages": messages,
        }))
    }

    async fn append_message(&self, args: &Value, ctx: &CallContext) -> Result<Value> {
        let content = require_str(args, "content", "content_required")?;
        let role = opt_str(args, "role").unwrap_or_else(|| "user".to_string());
        if !ROLES.contains(&role.as_str()) {
            return Err(Error::validation("role_invalid"));
        }
        let content = self.deps.sanitizer.sanitize(&content);
        let timestamp = now();

        let mut statements = Vec::with_capacity(3);
        let (conversation_id, created) = match opt_str(args, "conversation_id") {
            Some(id) => (id, false),
            None => {
                let bot_id = opt_str(args, "bot_id")
                    .or_else(|| ctx.bot_id.as_ref().map(|b| b.to_string()))
                    .ok_or_else(|| Error::validation("bot_id_required"))?;
                let id = uuid::Uuid::new_v4().to_string();
                statements.push(Statement::new(
                    "INSERT INTO conversations (id, bot_id, user_id, title, status, message_count, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, 'open', 0, ?, ?)",
                    vec![
                        id.clone().into(),
                        bot_id.into(),
                        opt_str(args, "user_id")
                            .or_else(|| ctx.user_id.as_ref().map(|u| u.to_string()))
                            .into(),
                        opt_str(args, "title").map(|t| self.deps.sanitizer.sanitize(&t)).into(),
                        timestamp.clone().into(),
                        timestamp.clone().into(),
                    ],
                ));
                (id, true)
            }
        };

        // The update runs first so an unknown id aborts before the insert
        // trips the foreign key.
        statements.push(
            Statement::new(
                "UPDATE conversations SET message_count = message_count + 1, updated_at = ? WHERE id = ?",
                vec![timestamp.clone().into(), conversation_id.clone().into()],
            )
            .require_rows("conversation_not_found"),
        );
        statements.push(Statement::new(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            vec![
                conversation_id.clone().into(),
                role.clone().into(),
                content.into(),
                timestamp.into(),
            ],
        ));
        self.deps.db.transaction(statements).await?;

        let payload = json!({"conversation_id": conversation_id, "role": role, "created": created});
        self.deps
            .notify("conversation.message_appended", payload.clone(), ctx)
            .await;
        Ok(payload)
    }

    async fn delete(&self, args: &Value, ctx: &CallContext) -> Result<Value> {
        let id = require_str(args, "conversation_id", "conversation_id_required")?;
        let affected = self
            .deps
            .db
            .transaction(vec![
                Statement::new("DELETE FROM messages WHERE conversation_id = ?", vec![id.clone().into()]),
                Statement::new("DELETE FROM conversations WHERE id = ?", vec![id.clone().into()])
                    .require_rows("conversation_not_found"),
            ])
            .await?;
        let messages_deleted = affected.first().copied().unwrap_or(0);

        self.deps
            .notify("conversation.deleted", json!({"conversation_id": id}), ctx)
            .await;
        Ok(json!({
            "deleted": true,
            "conversation_id": id,
            "messages_deleted": messages_deleted,
        }))
    }
}

#[async_trait]
impl ToolHandler for ConversationTool {
    async fn call(&self, args: Value, ctx: &CallContext) -> Result<Value> {
        match self.op {
            ConversationOp::List => self.list(&args, ctx).await,
            ConversationOp::Get => self.get(&args).await,
            ConversationOp::AppendMessage => self.append_message(&args, ctx).await,
            ConversationOp::Delete => self.delete(&args, ctx).await,
            ConversationOp::RawQuery => Err(Error::disabled("db.raw_query")),
        }
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    let tool = |op| ConversationTool { deps: deps.clone(), op };
    vec![
        ToolDescriptor::new(
            "db.list_conversations",
            "List conversations, newest first, with a total count",
            vec![
                ParamDef::optional("bot_id", ParamType::String, "Filter by bot (defaults to the calling bot)"),
                ParamDef::optional("user_id", ParamType::String, "Filter by end user"),
                ParamDef::optional("status", ParamType::String, "Filter by status"),
                ParamDef::optional("search", ParamType::String, "Substring of the title"),
                ParamDef::optional("page", ParamType::Int, "1-based page"),
                ParamDef::optional("page_size", ParamType::Int, "Items per page (max 100)"),
            ],
            tool(ConversationOp::List),
        )
        .gated(),
        ToolDescriptor::new(
            "db.get_conversation",
            "Fetch one conversation and its messages",
            vec![
                ParamDef::required("conversation_id", ParamType::String, "Conversation id"),
                ParamDef::optional("limit", ParamType::Int, "Messages to return (max 500)"),
            ],
            tool(ConversationOp::Get),
        )
        .gated(),
        ToolDescriptor::new(
            "db.append_message",
            "Append a message, creating the conversation when no id is given",
            vec![
                ParamDef::optional("conversation_id", ParamType::String, "Existing conversation"),
                ParamDef::required("content", ParamType::String, "Message text"),
                ParamDef::optional(
                    "role",
                    ParamType::Enum(ROLES.iter().map(|r| r.to_string()).collect()),
                    "Author role (default user)",
                ),
                ParamDef::optional("bot_id", ParamType::String, "Bot for a new conversation"),
                ParamDef::optional("user_id", ParamType::String, "End user for a new conversation"),
                ParamDef::optional("title", ParamType::String, "Title for a new conversation"),
            ],
            tool(ConversationOp::AppendMessage),
        )
        .gated(),
        ToolDescriptor::new(
            "db.delete_conversation",
            "Delete a conversation and all of its messages",
            vec![ParamDef::required("conversation_id", ParamType::String, "Conversation id")],
            tool(ConversationOp::Delete),
        )
        .gated(),
        ToolDescriptor::new(
            "db.raw_query",
            "Disabled",
            vec![ParamDef::optional("sql", ParamType::String, "Ignored")],
            tool(ConversationOp::RawQuery),
        )
        .gated(),
    ]
}
