//! Directory listing tool.

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::Sandbox;
use serde::Serialize;
use serde_json::Value;

const MAX_ENTRIES: usize = 500;

pub struct ListDirTool {
    sandbox: Sandbox,
}

impl ListDirTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Serialize)]
struct Entry {
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the workspace, sorted by name."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: workspace root)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        let path = arguments["path"].as_str().unwrap_or(".");
        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| ToolFailure::SandboxViolation {
                reason: e.to_string(),
            })?;

        let mut dir = tokio::fs::read_dir(&resolved)
            .await
            .with_context(|| format!("listing {path}"))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            let (kind, size) = if file_type.is_dir() {
                ("dir", None)
            } else if file_type.is_symlink() {
                ("symlink", None)
            } else {
                ("file", entry.metadata().await.ok().map(|m| m.len()))
            };
            entries.push(Entry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let truncated = entries.len() > MAX_ENTRIES;
        entries.truncate(MAX_ENTRIES);

        Ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "entries": entries,
            "truncated": truncated,
        }))
    }
}
