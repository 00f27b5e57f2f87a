//! `conduit config`: Configuration inspection.

use conduit_config::AppConfig;
use std::path::Path;

pub fn show(config: &AppConfig) -> anyhow::Result<()> {
    let mut redacted = config.clone();
    if redacted.transport.api_key.is_some() {
        redacted.transport.api_key = Some("[REDACTED]".into());
    }
    println!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}

pub fn path(config_path: &Path) {
    println!("{}", config_path.display());
}
