//! `conduit tools`: Show the registered tools and their limits.

use super::build_registry;
use conduit_config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let registry = build_registry(config)?;

    println!("{} tools registered\n", registry.len());
    for tool in registry.iter() {
        let limit = config.tools.rate_limit_for(&tool.name);
        println!("  {}", tool.name);
        println!("    {}", tool.description);
        println!(
            "    timeout {}s · {} calls / {}s · {}",
            tool.timeout.as_secs(),
            limit.max_calls,
            limit.window_secs,
            if tool.order_sensitive {
                "serialized"
            } else {
                "parallel"
            }
        );
        println!();
    }
    Ok(())
}
