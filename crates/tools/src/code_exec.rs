//! Code execution tool: run a snippet in a fresh interpreter process.
//!
//! Each call starts a new interpreter in the workspace; nothing carries
//! over between calls. A snippet that raises or exits non-zero is still a
//! successful call: the model gets `error: true` with the captured output.

use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::{CommandPolicy, Sandbox};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::process;

/// Interpreters a snippet can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Shell,
}

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "python" | "python3" | "py" => Some(Self::Python),
            "sh" | "shell" | "bash" => Some(Self::Shell),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Shell => "sh",
        }
    }

    fn command(self, code: &str) -> Command {
        let (program, flag) = match self {
            Self::Python => ("python3", "-c"),
            Self::Shell => ("sh", "-c"),
        };
        let mut cmd = Command::new(program);
        cmd.args([flag, code]);
        if self == Self::Python {
            cmd.env("PYTHONDONTWRITEBYTECODE", "1")
                .env("PYTHONUNBUFFERED", "1");
        }
        cmd
    }
}

pub struct CodeExecTool {
    sandbox: Sandbox,
    policy: CommandPolicy,
    max_output_bytes: usize,
}

impl CodeExecTool {
    pub fn new(sandbox: Sandbox, policy: CommandPolicy, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            policy,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl Tool for CodeExecTool {
    fn name(&self) -> &str {
        "code_exec"
    }

    fn description(&self) -> &str {
        "Run a Python or shell snippet in a fresh interpreter inside the workspace and return its output."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Source code to run"
                },
                "language": {
                    "type": "string",
                    "enum": ["python", "sh"],
                    "description": "Interpreter (default: python)"
                }
            },
            "required": ["code"],
            "additionalProperties": false
        })
    }

    fn order_sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| ToolFailure::InvalidArguments("Missing 'code' argument".into()))?;
        let language = match arguments["language"].as_str() {
            None => Language::Python,
            Some(name) => Language::parse(name).ok_or_else(|| {
                ToolFailure::InvalidArguments(format!(
                    "unsupported language '{name}'; use 'python' or 'sh'"
                ))
            })?,
        };

        self.policy
            .check(code)
            .map_err(|e| ToolFailure::SandboxViolation {
                reason: e.to_string(),
            })?;
        let cwd = process::working_dir(&self.sandbox, None)?;

        debug!(
            language = language.as_str(),
            bytes = code.len(),
            request_id = %ctx.request_id,
            "Executing code"
        );
        let mut cmd = language.command(code);
        cmd.current_dir(&cwd);
        let output = process::run(cmd, language.as_str(), ctx, self.max_output_bytes).await?;

        Ok(serde_json::json!({
            "language": language.as_str(),
            "exit_code": output.exit_code,
            "error": !output.success(),
            "stdout": output.stdout,
            "stderr": output.stderr,
            "truncated": output.truncated,
        }))
    }
}
