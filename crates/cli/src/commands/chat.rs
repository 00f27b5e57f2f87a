//! `conduit chat`: Interactive or single-message chat mode.

use super::{build_registry, open_store};
use anyhow::bail;
use conduit_agent::{
    ActiveSession, ControllerConfig, ConversationController, ToolDispatcher, TurnEvent,
};
use conduit_config::AppConfig;
use conduit_core::event::EventBus;
use conduit_core::session::SessionId;
use conduit_core::tool::ToolOutcome;
use conduit_providers::OpenAiCompatTransport;
use conduit_security::{AuditLogger, DailyFileSink, TracingSink};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(
    config: AppConfig,
    session: Option<String>,
    message: Option<String>,
) -> anyhow::Result<()> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CONDUIT_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to the [transport] section of:");
        eprintln!("    {}", super::default_config_path().display());
        eprintln!();
        bail!("no API key found");
    }

    let registry = Arc::new(build_registry(&config)?);
    let tool_names = registry.names().join(", ");
    let dispatcher = ToolDispatcher::from_config(registry, &config.tools);
    let transport = Arc::new(OpenAiCompatTransport::from_config(&config.transport)?);
    let store = Arc::new(open_store(&config).await?);
    let bus = EventBus::default();
    let audit = attach_audit(&config.store.audit_dir, &bus);
    let controller = ConversationController::new(
        transport,
        dispatcher,
        store.clone(),
        ControllerConfig::from_app_config(&config),
    )
    .with_event_bus(bus);

    let resume = session.map(SessionId::from);
    let mut active = controller.open_session(resume.as_ref()).await?;

    let outcome = match message {
        Some(msg) => turn(&controller, &mut active, &msg).await,
        None => {
            println!();
            println!("  conduit: interactive mode");
            println!();
            println!("  Session:  {}", active.id());
            println!("  Model:    {}", config.transport.model);
            println!("  Tools:    {tool_names}");
            println!();
            println!("  Type 'exit' or press Ctrl+D to quit. Ctrl+C cancels the running turn,");
            println!("  or quits at the prompt.");
            println!();
            repl(&controller, &mut active).await
        }
    };

    store.close().await;
    // Dropping the last publisher lets the audit task drain and exit.
    drop(controller);
    if let Some(handle) = audit {
        if let Err(e) = handle.await {
            warn!(error = %e, "Audit task ended abnormally");
        }
    }
    outcome
}

/// Append every domain event to the daily audit log under `dir`.
///
/// A directory that cannot be created disables the audit log with a warning.
fn attach_audit(dir: &Path, bus: &EventBus) -> Option<JoinHandle<()>> {
    match DailyFileSink::new(dir) {
        Ok(sink) => Some(
            AuditLogger::new()
                .with_sink(sink)
                .with_sink(TracingSink)
                .attach(bus),
        ),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Audit log disabled");
            None
        }
    }
}

/// What the prompt produced.
#[derive(Debug, PartialEq, Eq)]
enum Prompt {
    Line(String),
    Eof,
    Interrupted,
}

/// Wait for the next input line, or for `interrupt` to fire first.
async fn next_prompt<R>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> std::io::Result<Prompt>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?.map_or(Prompt::Eof, Prompt::Line)),
        () = interrupt => Ok(Prompt::Interrupted),
    }
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn repl(
    controller: &ConversationController,
    active: &mut ActiveSession,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you > ");
        std::io::stdout().flush()?;

        let line = match next_prompt(&mut lines, ctrl_c()).await? {
            Prompt::Line(line) => line,
            Prompt::Eof | Prompt::Interrupted => {
                println!();
                break;
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }
        // The failure was rendered; the session stays usable.
        if let Err(err) = turn(controller, active, input).await {
            info!(session_id = %active.id(), "Turn failed: {err}");
        }
    }
    println!("  Session saved: {}", active.id());
    Ok(())
}

/// Run one turn, rendering its events as they arrive. Ctrl+C cancels it.
async fn turn(
    controller: &ConversationController,
    active: &mut ActiveSession,
    input: &str,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let run = async move {
        let result = controller.run_turn(active, input, &tx, &cancel).await;
        drop(tx);
        result
    };
    let render = async {
        while let Some(event) = rx.recv().await {
            render(&event);
        }
    };
    let (result, ()) = tokio::join!(run, render);
    interrupt.abort();

    result.map(|_| ()).map_err(Into::into)
}

fn render(event: &TurnEvent) {
    match event {
        TurnEvent::TextDelta { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        TurnEvent::ToolCallRequest {
            name, arguments, ..
        } => {
            eprintln!("\n  ⚙ {name} {arguments}");
        }
        TurnEvent::ToolResult {
            tool_name,
            outcome,
            duration_ms,
            ..
        } => match outcome {
            ToolOutcome::Success { .. } => {
                eprintln!("  ✓ {tool_name} ({duration_ms} ms)");
            }
            ToolOutcome::RecoverableError { error } | ToolOutcome::FatalError { error } => {
                eprintln!(
                    "  ✗ {tool_name} ({duration_ms} ms): {}: {}",
                    error.code, error.message
                );
            }
        },
        TurnEvent::TurnComplete { .. } => println!(),
        TurnEvent::TurnFailed { code, message } => {
            println!();
            eprintln!("  ✗ turn failed: {code}: {message}");
        }
    }
}
