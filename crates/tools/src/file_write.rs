//! File write tool: write or create files with path validation.
//!
//! An existing file is copied to `<name>.bak` first unless `backup` is false.

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::Sandbox;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct FileWriteTool {
    sandbox: Sandbox,
    max_file_size: u64,
}

impl FileWriteTool {
    pub fn new(sandbox: Sandbox, max_file_size: u64) -> Self {
        Self {
            sandbox,
            max_file_size,
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace. Creates the file and parent directories if needed; backs up an existing file first."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                },
                "backup": {
                    "type": "boolean",
                    "description": "Copy an existing file to <path>.bak before overwriting (default true)"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn order_sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolFailure::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolFailure::InvalidArguments("Missing 'content' argument".into()))?;
        let backup = arguments["backup"].as_bool().unwrap_or(true);

        if content.len() as u64 > self.max_file_size {
            return Err(ToolFailure::TooLarge {
                size: content.len() as u64,
                limit: self.max_file_size,
            }
            .into());
        }

        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| ToolFailure::SandboxViolation {
                reason: e.to_string(),
            })?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating parent directories for {path}"))?;
        }

        let backup_file = if backup && tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
            let target = backup_path(&resolved);
            tokio::fs::copy(&resolved, &target)
                .await
                .with_context(|| format!("backing up {path}"))?;
            Some(target.display().to_string())
        } else {
            None
        };

        tokio::fs::write(&resolved, content)
            .await
            .with_context(|| format!("writing {path}"))?;

        Ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "bytes_written": content.len(),
            "backup": backup_file,
        }))
    }
}
