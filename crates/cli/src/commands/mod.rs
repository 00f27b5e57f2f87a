pub mod chat;
pub mod config_cmd;
pub mod init;
pub mod sessions;
pub mod tools;

use anyhow::Context;
use conduit_config::AppConfig;
use conduit_core::tool::ToolRegistry;
use conduit_store::SqliteStore;
use conduit_tools::{BuiltinSettings, register_builtins};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn default_config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load_with_overrides(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// The built-in tools, with timeouts and limits from `[tools]`.
pub fn build_registry(config: &AppConfig) -> anyhow::Result<ToolRegistry> {
    let workspace_root = match &config.tools.workspace_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    let settings = BuiltinSettings {
        workspace_root,
        forbidden_paths: config.tools.forbidden_paths.clone(),
        blocked_commands: config.tools.blocked_commands.clone(),
        max_file_size: config.tools.max_file_size_bytes,
        max_output_bytes: config.tools.max_output_bytes,
    };

    let mut builder = ToolRegistry::builder().default_timeout(config.tools.default_timeout());
    for (name, overrides) in &config.tools.overrides {
        if let Some(secs) = overrides.timeout_secs {
            builder = builder.timeout_for(name.clone(), Duration::from_secs(secs));
        }
    }
    Ok(register_builtins(builder, &settings).build()?)
}

pub async fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.store.path)
        .await
        .with_context(|| format!("failed to open session store {}", config.store.path.display()))
}
