//! Git tool: run `git` against repositories inside the workspace.
//!
//! Only a fixed set of subcommands is accepted, global options before the
//! subcommand are refused, and path-like arguments must resolve inside the
//! sandbox. Repository discovery stops at the workspace so a call never
//! reaches a repository that encloses it.

use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::Sandbox;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::process;

/// Subcommands the model may run.
pub const ALLOWED_SUBCOMMANDS: &[&str] = &[
    "add", "branch", "checkout", "clone", "commit", "diff", "fetch", "init", "log", "pull",
    "push", "remote", "restore", "rev-parse", "show", "stash", "status", "switch", "tag",
];

/// Options whose value is free text, not a path.
const TEXT_OPTIONS: &[&str] = &["-m", "--message", "--format", "--pretty"];

pub struct GitTool {
    sandbox: Sandbox,
    max_output_bytes: usize,
}

impl GitTool {
    pub fn new(sandbox: Sandbox, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            max_output_bytes,
        }
    }

    fn parse_args(&self, arguments: &Value) -> Result<Vec<String>, ToolFailure> {
        let args = arguments["args"]
            .as_array()
            .ok_or_else(|| ToolFailure::InvalidArguments("Missing 'args' array".into()))?
            .iter()
            .map(|a| {
                a.as_str().map(str::to_string).ok_or_else(|| {
                    ToolFailure::InvalidArguments("every entry of 'args' must be a string".into())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some(subcommand) = args.first() else {
            return Err(ToolFailure::InvalidArguments(
                "'args' must start with a git subcommand".into(),
            ));
        };
        if subcommand.starts_with('-') {
            return Err(ToolFailure::SandboxViolation {
                reason: format!("global option '{subcommand}' is not allowed; start with the subcommand"),
            });
        }
        if !ALLOWED_SUBCOMMANDS.contains(&subcommand.as_str()) {
            return Err(ToolFailure::InvalidArguments(format!(
                "git subcommand '{subcommand}' is not allowed; use one of: {}",
                ALLOWED_SUBCOMMANDS.join(", ")
            )));
        }

        let mut previous: Option<&str> = None;
        for arg in &args[1..] {
            let is_text = previous.is_some_and(|p| TEXT_OPTIONS.contains(&p));
            if !is_text && looks_like_path(arg) {
                self.sandbox
                    .resolve(arg)
                    .map_err(|e| ToolFailure::SandboxViolation {
                        reason: e.to_string(),
                    })?;
            }
            previous = Some(arg.as_str());
        }
        Ok(args)
    }
}

/// Absolute, home-relative or parent-relative arguments, including the
/// value half of `--opt=/path`.
fn looks_like_path(arg: &str) -> bool {
    let value = arg.split_once('=').map_or(arg, |(_, v)| v);
    value.starts_with('/') || value.starts_with('~') || value.split('/').any(|part| part == "..")
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git_exec"
    }

    fn description(&self) -> &str {
        "Run a git subcommand (status, diff, log, add, commit, branch, clone, pull, push, ...) in a repository inside the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Arguments after 'git', starting with the subcommand, e.g. [\"commit\", \"-m\", \"msg\"]"
                },
                "working_directory": {
                    "type": "string",
                    "description": "Repository directory, relative to the workspace (default: workspace root)"
                }
            },
            "required": ["args"],
            "additionalProperties": false
        })
    }

    fn order_sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let args = self.parse_args(&arguments)?;
        let cwd = process::working_dir(&self.sandbox, arguments["working_directory"].as_str())?;

        debug!(args = ?args, cwd = %cwd.display(), request_id = %ctx.request_id, "Executing git");

        let mut cmd = Command::new("git");
        cmd.args(&args)
            .current_dir(&cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_PAGER", "cat");
        if let Some(ceiling) = self.sandbox.workspace().and_then(|w| w.parent()) {
            cmd.env("GIT_CEILING_DIRECTORIES", ceiling);
        }
        let output = process::run(cmd, "git", ctx, self.max_output_bytes).await?;

        if !output.success() {
            warn!(subcommand = %args[0], exit_code = output.exit_code, "git exited non-zero");
            let detail = output.stderr.trim();
            return Err(ToolFailure::ExecutionFailed {
                reason: format!(
                    "git {} exited with {}: {}",
                    args[0],
                    output.exit_code,
                    if detail.is_empty() { output.stdout.trim() } else { detail }
                ),
            }
            .into());
        }

        Ok(serde_json::json!({
            "subcommand": args[0],
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
    use serde_json::json;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn tool(dir: &std::path::Path) -> GitTool {
        GitTool::new(Sandbox::rooted(dir), 4096)
    }

    async fn git(tool: &GitTool, args: Value) -> anyhow::Result<Value> {
        tool.execute(json!({ "args": args }), &ToolContext::detached("c1"))
            .await
    }

    fn failure(err: &anyhow::Error) -> &ToolFailure {
        err.downcast_ref::<ToolFailure>().unwrap()
    }

    #[tokio::test]
    async fn init_add_and_status() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git_tool = tool(dir.path());

        git(&git_tool, json!(["init"])).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        git(&git_tool, json!(["add", "notes.txt"])).await.unwrap();

        let out = git(&git_tool, json!(["status", "--porcelain"])).await.unwrap();
        assert_eq!(out["subcommand"], "status");
        assert_eq!(out["exit_code"], 0);
        assert!(out["stdout"].as_str().unwrap().contains("A  notes.txt"));
    }

    #[tokio::test]
    async fn outside_a_repository_fails_without_finding_a_parent_repo() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = git(&tool(dir.path()), json!(["status"])).await.unwrap_err();
        assert!(matches!(failure(&err), ToolFailure::ExecutionFailed { .. }));
        assert!(err.to_string().contains("git status exited"));
    }

    #[tokio::test]
    async fn unlisted_subcommand_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = git(&tool(dir.path()), json!(["config", "core.editor", "vim"]))
            .await
            .unwrap_err();
        assert!(matches!(failure(&err), ToolFailure::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn leading_global_option_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = git(&tool(dir.path()), json!(["-c", "core.hooksPath=/tmp", "status"]))
            .await
            .unwrap_err();
        assert!(matches!(failure(&err), ToolFailure::SandboxViolation { .. }));
    }

    #[tokio::test]
    async fn paths_outside_the_workspace_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let git_tool = tool(dir.path());
        for args in [
            json!(["clone", "https://example.com/repo.git", "/etc/repo"]),
            json!(["add", "../escape.txt"]),
            json!(["log", "--output=/tmp/log.txt"]),
        ] {
            let err = git(&git_tool, args).await.unwrap_err();
            assert!(matches!(failure(&err), ToolFailure::SandboxViolation { .. }));
        }
    }

    #[test]
    fn commit_messages_are_not_treated_as_paths() {
        let dir = tempfile::tempdir().unwrap();
        let args = json!(["commit", "-m", "/ move ../docs"]);
        assert!(tool(dir.path()).parse_args(&json!({ "args": args })).is_ok());
    }

    #[tokio::test]
    async fn args_must_be_strings() {
        let dir = tempfile::tempdir().unwrap();
        let err = git(&tool(dir.path()), json!(["status", 3])).await.unwrap_err();
        assert!(matches!(failure(&err), ToolFailure::InvalidArguments(_)));
        let err = git(&tool(dir.path()), json!([])).await.unwrap_err();
        assert!(matches!(failure(&err), ToolFailure::InvalidArguments(_)));
    }
}
