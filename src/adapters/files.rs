//! Bounded file previews confined to the configured root.

use super::ToolDeps;
use crate::tools::args::{opt_u64, require_str};
use crate::tools::{ParamDef, ParamType, ToolDescriptor, ToolHandler};
use crate::types::{CallContext, Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

pub const DEFAULT_PREVIEW_BYTES: u64 = 4096;
pub const MAX_PREVIEW_BYTES: u64 = 64 * 1024;

/// Resolve `relative` under `root`, refusing anything that escapes it.
async fn confine(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(Error::validation("path_outside_root"));
    }
    let root = tokio::fs::canonicalize(root).await?;
    let full = match tokio::fs::canonicalize(root.join(relative)).await {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found("file_not_found")),
        Err(e) => return Err(e.into()),
    };
    // Symlinks may still point outside.
    if !full.starts_with(&root) {
        return Err(Error::validation("path_outside_root"));
    }
    Ok(full)
}

struct FilePreview {
    deps: Arc<ToolDeps>,
}

#[async_trait]
impl ToolHandler for FilePreview {
    async fn call(&self, args: Value, _ctx: &CallContext) -> Result<Value> {
        let relative = require_str(&args, "path", "path_required")?;
        let root = self
            .deps
            .files_root
            .as_deref()
            .ok_or_else(|| Error::config_missing("files"))?;
        let max_bytes = opt_u64(&args, "max_bytes")?
            .unwrap_or(DEFAULT_PREVIEW_BYTES)
            .clamp(1, MAX_PREVIEW_BYTES);

        let full = confine(root, &relative).await?;
        let metadata = tokio::fs::metadata(&full).await?;
        if !metadata.is_file() {
            return Err(Error::validation("not_a_file"));
        }

        let file = tokio::fs::File::open(&full).await?;
        let mut buf = Vec::with_capacity(max_bytes as usize);
        file.take(max_bytes).read_to_end(&mut buf).await?;

        let size = metadata.len();
        let (content, encoding) = match std::str::from_utf8(&buf) {
            Ok(text) if !text.contains('\0') => (text.to_string(), "utf-8"),
            // A multi-byte character cut at the limit is still text.
            Err(e) if e.error_len().is_none() && size > max_bytes => {
                (String::from_utf8_lossy(&buf[..e.valid_up_to()]).into_owned(), "utf-8")
            }
            _ => (BASE64.encode(&buf), "base64"),
        };

        Ok(json!({
            "path": relative,
            "size": size,
            "truncated": size > buf.len() as u64,
            "encoding": encoding,
            "content": content,
        }))
    }
}

pub(super) fn descriptors(deps: Arc<ToolDeps>) -> Vec<ToolDescriptor> {
    vec![ToolDescriptor::new(
        "files.preview",
        "Read the beginning of an uploaded file",
        vec![
            ParamDef::required("path", ParamType::String, "Path relative to the files root"),
            ParamDef::optional("max_bytes", ParamType::Int, "Bytes to read (max 65536)"),
        ],
        FilePreview { deps },
    )
    .gated()]
}
