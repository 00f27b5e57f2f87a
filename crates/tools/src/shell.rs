//! Shell tool: execute system commands.
//!
//! Runs `sh -c` inside the workspace, refuses high-risk patterns, caps
//! captured output, and kills the child when the call is cancelled or the
//! dispatcher abandons it.

use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::{CommandPolicy, Sandbox};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::process;

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    sandbox: Sandbox,
    policy: CommandPolicy,
    max_output_bytes: usize,
}

impl ShellTool {
    pub fn new(sandbox: Sandbox, policy: CommandPolicy, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            policy,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "bash_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return stdout, stderr and the exit code."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_directory": {
                    "type": "string",
                    "description": "Directory to run in, relative to the workspace (default: workspace root)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn order_sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolFailure::InvalidArguments("Missing 'command' argument".into()))?;

        self.policy
            .check(command)
            .map_err(|e| ToolFailure::SandboxViolation {
                reason: e.to_string(),
            })?;

        let cwd = process::working_dir(&self.sandbox, arguments["working_directory"].as_str())?;

        debug!(command = %command, cwd = %cwd.display(), request_id = %ctx.request_id, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&cwd);
        let output = process::run(cmd, "shell", ctx, self.max_output_bytes).await?;
        if !output.success() {
            warn!(command = %command, exit_code = output.exit_code, "Command exited non-zero");
        }

        Ok(serde_json::json!({
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "truncated": output.truncated,
            "cwd": cwd.display().to_string(),
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn tool(dir: &std::path::Path) -> ShellTool {
        ShellTool::new(
            Sandbox::rooted(dir),
            CommandPolicy::new(&["rm -rf".into(), "sudo".into()]),
            1024,
        )
    }

    #[tokio::test]
    async fn execute_echo() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path())
            .execute(
                serde_json::json!({"command": "echo hello"}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = tool(dir.path())
            .execute(serde_json::json!({"command": "ls"}), &ToolContext::detached("c1"))
            .await
            .unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("marker.txt"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path())
            .execute(
                serde_json::json!({"command": "echo oops >&2; exit 3"}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 3);
        assert_eq!(out["stderr"], "oops\n");
    }

    #[tokio::test]
    async fn blocked_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path())
            .execute(
                serde_json::json!({"command": "sudo rm -rf /"}),
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
    async fn output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path())
            .execute(
                serde_json::json!({"command": "head -c 5000 /dev/zero | tr '\\0' a"}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap();
        assert_eq!(out["truncated"], true);
        assert_eq!(out["stdout"].as_str().unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn cancellation_stops_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let ctx = ToolContext::new("s1", "c1", cancel.clone());
        let shell = tool(dir.path());

        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (result, _) = tokio::join!(
            shell.execute(serde_json::json!({"command": "sleep 5"}), &ctx),
            trigger
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolFailure>(),
            Some(ToolFailure::Cancelled)
        ));
    }
}
