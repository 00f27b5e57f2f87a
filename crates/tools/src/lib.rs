//! Built-in tool implementations for conduit.
//!
//! The built-ins form a closed set, [`Capability`]. Each variant implements
//! the uniform [`Tool`] contract; [`register_builtins`] adds all of them to a
//! registry builder at startup.

pub mod calculator;
pub mod code_exec;
pub mod file_read;
pub mod file_write;
pub mod git;
pub mod grep;
pub mod list_dir;
mod process;
pub mod shell;

use async_trait::async_trait;
use conduit_core::tool::{Tool, ToolContext, ToolRegistryBuilder};
use conduit_security::{CommandPolicy, Sandbox};
use serde_json::Value;
use std::path::PathBuf;

pub use calculator::CalculatorTool;
pub use code_exec::CodeExecTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use git::GitTool;
pub use grep::GrepTool;
pub use list_dir::ListDirTool;
pub use shell::ShellTool;

/// Limits and policies shared by the built-ins.
#[derive(Debug, Clone)]
pub struct BuiltinSettings {
    pub workspace_root: PathBuf,
    pub forbidden_paths: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub max_file_size: u64,
    pub max_output_bytes: usize,
}

/// The fixed set of built-in capabilities.
pub enum Capability {
    BashExec(ShellTool),
    CodeExec(CodeExecTool),
    GitExec(GitTool),
    FileRead(FileReadTool),
    FileWrite(FileWriteTool),
    ListDir(ListDirTool),
    Grep(GrepTool),
    Calculator(CalculatorTool),
}

impl Capability {
    fn tool(&self) -> &dyn Tool {
        match self {
            Self::BashExec(t) => t,
            Self::CodeExec(t) => t,
            Self::GitExec(t) => t,
            Self::FileRead(t) => t,
            Self::FileWrite(t) => t,
            Self::ListDir(t) => t,
            Self::Grep(t) => t,
            Self::Calculator(t) => t,
        }
    }

    /// Every built-in, configured from `settings`.
    pub fn all(settings: &BuiltinSettings) -> Vec<Capability> {
        let sandbox = Sandbox::new(
            vec![settings.workspace_root.clone()],
            &settings.forbidden_paths,
        );
        let policy = CommandPolicy::new(&settings.blocked_commands);
        vec![
            Self::BashExec(ShellTool::new(
                sandbox.clone(),
                policy.clone(),
                settings.max_output_bytes,
            )),
            Self::CodeExec(CodeExecTool::new(
                sandbox.clone(),
                policy,
                settings.max_output_bytes,
            )),
            Self::GitExec(GitTool::new(sandbox.clone(), settings.max_output_bytes)),
            Self::FileRead(FileReadTool::new(sandbox.clone(), settings.max_file_size)),
            Self::FileWrite(FileWriteTool::new(sandbox.clone(), settings.max_file_size)),
            Self::ListDir(ListDirTool::new(sandbox.clone())),
            Self::Grep(GrepTool::new(sandbox, settings.max_file_size)),
            Self::Calculator(CalculatorTool),
        ]
    }
}

#[async_trait]
impl Tool for Capability {
    fn name(&self) -> &str {
        self.tool().name()
    }

    fn description(&self) -> &str {
        self.tool().description()
    }

    fn parameters_schema(&self) -> Value {
        self.tool().parameters_schema()
    }

    fn order_sensitive(&self) -> bool {
        self.tool().order_sensitive()
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        self.tool().execute(arguments, ctx).await
    }
}

/// Add every built-in to `builder`.
pub fn register_builtins(
    builder: ToolRegistryBuilder,
    settings: &BuiltinSettings,
) -> ToolRegistryBuilder {
    Capability::all(settings)
        .into_iter()
        .fold(builder, |b, capability| b.register(capability))
}

/// Lossy UTF-8 decode of at most `max` bytes, cut on a char boundary.
pub(crate) fn truncate_utf8(bytes: &[u8], max: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return (text.into_owned(), false);
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (text[..cut].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::tool::ToolRegistry;

    fn settings(root: &std::path::Path) -> BuiltinSettings {
        BuiltinSettings {
            workspace_root: root.to_path_buf(),
            forbidden_paths: vec![],
            blocked_commands: vec!["sudo".into()],
            max_file_size: 1024,
            max_output_bytes: 1024,
        }
    }

    #[test]
    fn registers_every_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let registry = register_builtins(ToolRegistry::builder(), &settings(dir.path()))
            .build()
            .unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "bash_exec",
                "calculator",
                "code_exec",
                "file_read",
                "file_write",
                "git_exec",
                "grep",
                "list_dir"
            ]
        );
        assert!(registry.get("bash_exec").unwrap().order_sensitive);
        assert!(registry.get("git_exec").unwrap().order_sensitive);
        assert!(registry.get("code_exec").unwrap().order_sensitive);
        assert!(registry.get("file_write").unwrap().order_sensitive);
        assert!(!registry.get("file_read").unwrap().order_sensitive);
    }

    #[tokio::test]
    async fn capability_delegates_execution() {
        let dir = tempfile::tempdir().unwrap();
        let calc = Capability::all(&settings(dir.path()))
            .into_iter()
            .find(|c| c.name() == "calculator")
            .unwrap();
        let out = calc
            .execute(serde_json::json!({"expression": "6 * 7"}), &ToolContext::detached("c1"))
            .await
            .unwrap();
        assert_eq!(out["result"], 42.0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let (text, truncated) = truncate_utf8("héllo".as_bytes(), 2);
        assert_eq!(text, "h");
        assert!(truncated);

        let (text, truncated) = truncate_utf8(b"short", 10);
        assert_eq!(text, "short");
        assert!(!truncated);
    }
}
