//! File read tool: read file contents with path validation.

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::Sandbox;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::truncate_utf8;

pub struct FileReadTool {
    sandbox: Sandbox,
    /// Files above this size are refused unless `max_bytes` is given.
    max_file_size: u64,
}

impl FileReadTool {
    pub fn new(sandbox: Sandbox, max_file_size: u64) -> Self {
        Self {
            sandbox,
            max_file_size,
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "max_bytes": {
                    "type": "integer",
                    "description": "Read at most this many bytes from the start of the file"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolFailure::InvalidArguments("Missing 'path' argument".into()))?;
        let max_bytes = arguments["max_bytes"].as_u64();

        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| ToolFailure::SandboxViolation {
                reason: e.to_string(),
            })?;

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .with_context(|| format!("reading metadata for {path}"))?;
        if metadata.is_dir() {
            return Err(
                ToolFailure::InvalidArguments(format!("'{path}' is a directory")).into(),
            );
        }

        let size = metadata.len();
        let limit = match max_bytes {
            Some(n) => n.min(self.max_file_size),
            None if size > self.max_file_size => {
                return Err(ToolFailure::TooLarge {
                    size,
                    limit: self.max_file_size,
                }
                .into());
            }
            None => size,
        };

        let file = tokio::fs::File::open(&resolved)
            .await
            .with_context(|| format!("opening {path}"))?;
        let mut buf = Vec::with_capacity(limit as usize);
        file.take(limit)
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("reading {path}"))?;

        let (content, _) = truncate_utf8(&buf, buf.len());
        Ok(serde_json::json!({
            "path": resolved.display().to_string(),
            "bytes": size,
            "content": content,
            "truncated": (buf.len() as u64) < size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &std::path::Path, limit: u64) -> FileReadTool {
        FileReadTool::new(Sandbox::rooted(dir), limit)
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "Hello from test file!").unwrap();

        let out = tool(dir.path(), 1024)
            .execute(serde_json::json!({"path": "test.txt"}), &ToolContext::detached("c1"))
            .await
            .unwrap();
        assert_eq!(out["content"], "Hello from test file!");
        assert_eq!(out["bytes"], 21);
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn read_nonexistent_file_keeps_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path(), 1024)
            .execute(serde_json::json!({"path": "missing.txt"}), &ToolContext::detached("c1"))
            .await
            .unwrap_err();
        let io = err
            .chain()
            .find_map(|e| e.downcast_ref::<std::io::Error>())
            .unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn oversized_file_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();

        let err = tool(dir.path(), 10)
            .execute(serde_json::json!({"path": "big.txt"}), &ToolContext::detached("c1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolFailure>(),
            Some(ToolFailure::TooLarge { size: 100, limit: 10 })
        ));
    }

    #[tokio::test]
    async fn max_bytes_reads_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "abcdefghij").unwrap();

        let out = tool(dir.path(), 1024)
            .execute(
                serde_json::json!({"path": "big.txt", "max_bytes": 4}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap();
        assert_eq!(out["content"], "abcd");
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn escape_is_sandbox_violation() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path(), 1024)
            .execute(
                serde_json::json!({"path": "../outside.txt"}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolFailure>(),
            Some(ToolFailure::SandboxViolation { .. })
        ));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool(dir.path(), 1024)
            .execute(serde_json::json!({}), &ToolContext::detached("c1"))
            .await;
        assert!(result.is_err());
    }
}
