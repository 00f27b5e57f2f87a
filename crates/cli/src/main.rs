//! conduit CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive or single-message chat, optionally resuming a session
//! - `sessions`: List, show or archive stored sessions
//! - `tools`: Show registered tools and their limits
//! - `init`: Write a default config file
//! - `config`: Show the effective configuration or its path

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "conduit",
    about = "conduit: streaming agent loop with rate-limited tools and durable sessions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.conduit/config.toml
    #[arg(long, global = true, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Resume an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// List registered tools
    Tools,

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// Most recently active sessions first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a session's full history
    Show { id: String },
    /// Mark a session archived; its history is kept
    Archive { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr; stdout carries the assistant's text.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(commands::default_config_path);

    match cli.command {
        Commands::Chat { session, message } => {
            let config = commands::load_config(&config_path)?;
            commands::chat::run(config, session, message).await?
        }
        Commands::Sessions { command } => {
            let config = commands::load_config(&config_path)?;
            match command {
                SessionsCommand::List { limit } => commands::sessions::list(&config, limit).await?,
                SessionsCommand::Show { id } => commands::sessions::show(&config, &id).await?,
                SessionsCommand::Archive { id } => {
                    commands::sessions::archive(&config, &id).await?
                }
            }
        }
        Commands::Tools => {
            let config = commands::load_config(&config_path)?;
            commands::tools::run(&config)?
        }
        Commands::Init { force } => commands::init::run(&config_path, force)?,
        Commands::Config { command } => match command {
            ConfigCommand::Show => {
                let config = commands::load_config(&config_path)?;
                commands::config_cmd::show(&config)?
            }
            ConfigCommand::Path => commands::config_cmd::path(&config_path),
        },
    }

    Ok(())
}
