//! `conduit sessions`: Inspect and archive stored sessions.

use super::open_store;
use conduit_config::AppConfig;
use conduit_core::message::{ContentBlock, Message};
use conduit_core::session::{SessionId, SessionStore};

pub async fn list(config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let sessions = store.list_sessions(limit).await;
    store.close().await;
    let sessions = sessions?;

    if sessions.is_empty() {
        println!("No sessions yet. Start one with `conduit chat`.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:>5}  {:>7}  {:<16}  PREVIEW",
        "ID", "STATUS", "MSGS", "TOKENS", "UPDATED"
    );
    for s in sessions {
        println!(
            "{:<36}  {:<8}  {:>5}  {:>7}  {:<16}  {}",
            s.id,
            s.status.as_str(),
            s.message_count,
            s.token_count,
            s.updated_at.format("%Y-%m-%d %H:%M"),
            s.preview.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn show(config: &AppConfig, id: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let session = store.load_session(&SessionId::from(id)).await;
    store.close().await;
    let session = session?;

    println!("Session:  {}", session.id);
    println!("Status:   {}", session.status.as_str());
    println!("Created:  {}", session.created_at.to_rfc3339());
    println!("Messages: {}", session.messages.len());
    println!("Tokens:   {}", session.token_count);
    println!();
    for message in &session.messages {
        print_message(message);
    }
    Ok(())
}

pub async fn archive(config: &AppConfig, id: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let result = store.archive_session(&SessionId::from(id)).await;
    store.close().await;
    result?;
    println!("Archived {id}");
    Ok(())
}

fn print_message(message: &Message) {
    let stamp = message.timestamp.format("%H:%M:%S");
    for block in &message.content {
        match block {
            ContentBlock::Text { text } => {
                println!("[{stamp}] {}: {text}", message.role.as_str());
            }
            ContentBlock::ToolCall(call) => {
                println!("[{stamp}] tool call {} {} {}", call.id, call.name, call.arguments);
            }
            ContentBlock::ToolResult(result) => {
                println!(
                    "[{stamp}] tool result {} {}: {}",
                    result.request_id,
                    result.outcome.tag(),
                    result.to_model_content()
                );
            }
        }
    }
}
