//! Child-process plumbing shared by the subprocess tools.

use anyhow::Context;
use conduit_core::error::ToolFailure;
use conduit_core::tool::ToolContext;
use conduit_security::Sandbox;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

use crate::truncate_utf8;

/// What a finished child wrote, capped to the tool's output limit.
#[derive(Debug)]
pub(crate) struct Captured {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Resolve an optional `working_directory` argument inside the sandbox.
pub(crate) fn working_dir(sandbox: &Sandbox, dir: Option<&str>) -> Result<PathBuf, ToolFailure> {
    let cwd = sandbox
        .resolve(dir.unwrap_or("."))
        .map_err(|e| ToolFailure::SandboxViolation {
            reason: e.to_string(),
        })?;
    if !cwd.is_dir() {
        return Err(ToolFailure::NotFound {
            path: cwd.display().to_string(),
        });
    }
    Ok(cwd)
}

/// Spawn `cmd` with piped output and wait for it, or for `ctx.cancel`.
///
/// The child is killed when the call is cancelled or when the dispatcher
/// drops this future at its timeout.
pub(crate) async fn run(
    mut cmd: Command,
    program: &str,
    ctx: &ToolContext,
    max_output_bytes: usize,
) -> anyhow::Result<Captured> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        out = child.wait_with_output() => {
            out.with_context(|| format!("failed to collect {program} output"))?
        }
        _ = ctx.cancel.cancelled() => {
            warn!(program, request_id = %ctx.request_id, "Child process cancelled");
            return Err(ToolFailure::Cancelled.into());
        }
    };

    let (stdout, stdout_truncated) = truncate_utf8(&output.stdout, max_output_bytes);
    let (stderr, stderr_truncated) = truncate_utf8(&output.stderr, max_output_bytes);
    Ok(Captured {
        exit_code: output.status.code().unwrap_or(-1),
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
    })
}
