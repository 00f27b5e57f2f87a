//! Text search tool: literal substring search over workspace files.
//!
//! The walk runs on the blocking pool and checks the cancellation token
//! between files.

use async_trait::async_trait;
use conduit_core::error::ToolFailure;
use conduit_core::tool::{Tool, ToolContext};
use conduit_security::Sandbox;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_RESULTS: usize = 50;
const MAX_RESULTS_CAP: usize = 500;

pub struct GrepTool {
    sandbox: Sandbox,
    max_file_size: u64,
}

impl GrepTool {
    pub fn new(sandbox: Sandbox, max_file_size: u64) -> Self {
        Self {
            sandbox,
            max_file_size,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct Match {
    file: String,
    line: usize,
    text: String,
}

struct SearchOutcome {
    matches: Vec<Match>,
    truncated: bool,
    files_scanned: usize,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search workspace files for lines containing a literal string. Skips hidden directories and binary files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Literal text to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: workspace root)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum matches to return (default 50)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Ignore case when matching"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let pattern = arguments["pattern"]
            .as_str()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ToolFailure::InvalidArguments("'pattern' must be non-empty".into()))?
            .to_string();
        let path = arguments["path"].as_str().unwrap_or(".");
        let max_results = arguments["max_results"]
            .as_u64()
            .map(|n| (n as usize).min(MAX_RESULTS_CAP))
            .unwrap_or(DEFAULT_MAX_RESULTS);
        let case_insensitive = arguments["case_insensitive"].as_bool().unwrap_or(false);

        let root = self
            .sandbox
            .resolve(path)
            .map_err(|e| ToolFailure::SandboxViolation {
                reason: e.to_string(),
            })?;
        if !root.exists() {
            return Err(ToolFailure::NotFound {
                path: path.to_string(),
            }
            .into());
        }

        let cancel = ctx.cancel.clone();
        let max_file_size = self.max_file_size;
        let outcome = tokio::task::spawn_blocking(move || {
            search(&root, &pattern, case_insensitive, max_results, max_file_size, || {
                cancel.is_cancelled()
            })
        })
        .await??;

        Ok(serde_json::json!({
            "matches": outcome.matches,
            "truncated": outcome.truncated,
            "files_scanned": outcome.files_scanned,
        }))
    }
}

fn search(
    root: &Path,
    pattern: &str,
    case_insensitive: bool,
    max_results: usize,
    max_file_size: u64,
    cancelled: impl Fn() -> bool,
) -> anyhow::Result<SearchOutcome> {
    let needle = if case_insensitive {
        pattern.to_lowercase()
    } else {
        pattern.to_string()
    };
    let base = if root.is_dir() {
        root.to_path_buf()
    } else {
        root.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    let mut outcome = SearchOutcome {
        matches: Vec::new(),
        truncated: false,
        files_scanned: 0,
    };
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(path) = stack.pop() {
        if cancelled() {
            return Err(ToolFailure::Cancelled.into());
        }
        if path.is_dir() {
            let mut children: Vec<PathBuf> = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    !p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'))
                })
                .collect();
            // Reverse so pops come out in name order.
            children.sort();
            children.reverse();
            stack.extend(children);
            continue;
        }

        let Ok(meta) = path.metadata() else { continue };
        if meta.len() > max_file_size {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        outcome.files_scanned += 1;

        let display = path
            .strip_prefix(&base)
            .unwrap_or(&path)
            .display()
            .to_string();
        for (idx, line) in text.lines().enumerate() {
            let hit = if case_insensitive {
                line.to_lowercase().contains(&needle)
            } else {
                line.contains(&needle)
            };
            if !hit {
                continue;
            }
            if outcome.matches.len() == max_results {
                outcome.truncated = true;
                return Ok(outcome);
            }
            outcome.matches.push(Match {
                file: display.clone(),
                line: idx + 1,
                text: line.trim_end().to_string(),
            });
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {\n    run();\n}\n").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn run() {}\n").unwrap();
        std::fs::write(dir.path().join(".git/config"), "run = true\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_in_name_order() {
        let dir = fixture();
        let out = GrepTool::new(Sandbox::rooted(dir.path()), 1024)
            .execute(serde_json::json!({"pattern": "run"}), &ToolContext::detached("c1"))
            .await
            .unwrap();

        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["file"], "src/lib.rs");
        assert_eq!(matches[1]["file"], "src/main.rs");
        assert_eq!(matches[1]["line"], 2);
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn respects_max_results() {
        let dir = fixture();
        let out = GrepTool::new(Sandbox::rooted(dir.path()), 1024)
            .execute(
                serde_json::json!({"pattern": "run", "max_results": 1}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap();
        assert_eq!(out["matches"].as_array().unwrap().len(), 1);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let dir = fixture();
        let out = GrepTool::new(Sandbox::rooted(dir.path()), 1024)
            .execute(
                serde_json::json!({"pattern": "MAIN", "case_insensitive": true}),
                &ToolContext::detached("c1"),
            )
            .await
            .unwrap();
        assert_eq!(out["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_pattern_rejected() {
        let dir = fixture();
        let err = GrepTool::new(Sandbox::rooted(dir.path()), 1024)
            .execute(serde_json::json!({"pattern": ""}), &ToolContext::detached("c1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolFailure>(),
            Some(ToolFailure::InvalidArguments(_))
        ));
    }

    #[test]
    fn search_stops_when_cancelled() {
        let dir = fixture();
        let result = search(dir.path(), "run", false, 10, 1024, || true);
        assert!(result.is_err());
    }
}
