//! Scripted transport and tools for controller tests.

use async_trait::async_trait;
use conduit_core::error::TransportError;
use conduit_core::tool::{Tool, ToolCallRequest, ToolContext};
use conduit_core::transport::{
    ModelTransport, TransportEvent, TransportRequest, TransportStream, Usage,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Script = Vec<Result<TransportEvent, TransportError>>;

/// Replays one script per `stream` call and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A transport that answers every round with the same tool call.
    pub fn looping(call: ToolCallRequest, rounds: usize) -> Self {
        Self::new((0..rounds).map(|_| tool_calls(vec![call.clone()])).collect())
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: TransportRequest,
        _cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Malformed("script exhausted".into()))?;

        let (tx, rx) = mpsc::channel(script.len().max(1));
        for event in script {
            tx.send(event).await.unwrap();
        }
        Ok(rx)
    }
}

/// Streams one delta, then holds the stream open until cancelled.
pub struct HangingTransport;

#[async_trait]
impl ModelTransport for HangingTransport {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn stream(
        &self,
        _request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(TransportEvent::TextDelta {
                    text: "thinking".into(),
                }))
                .await;
            cancel.cancelled().await;
        });
        Ok(rx)
    }
}

pub fn text(reply: &str) -> Script {
    vec![
        Ok(TransportEvent::TextDelta {
            text: reply.to_string(),
        }),
        Ok(TransportEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }),
    ]
}

pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Script {
    calls
        .into_iter()
        .map(|request| Ok(TransportEvent::ToolCall { request }))
        .chain(std::iter::once(Ok(TransportEvent::Done { usage: None })))
        .collect()
}

/// Fails with not-found for paths starting with `missing`, otherwise
/// returns `{"bytes": 245}`.
pub struct StubFileRead;

#[async_trait]
impl Tool for StubFileRead {
    fn name(&self) -> &str {
        "file_read"
    }
    fn description(&self) -> &str {
        "Read a file"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }
    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        match arguments["path"].as_str() {
            Some(path) if path.starts_with("missing") => {
                Err(conduit_core::error::ToolFailure::NotFound { path: path.into() }.into())
            }
            _ => Ok(json!({"bytes": 245})),
        }
    }
}

/// Sleeps `ms` milliseconds and logs start/end under its request id.
pub struct Sleeper {
    pub name: &'static str,
    pub order_sensitive: bool,
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for Sleeper {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Sleeps"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ms": { "type": "integer" } },
            "required": ["ms"]
        })
    }
    fn order_sensitive(&self) -> bool {
        self.order_sensitive
    }
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start {}", ctx.request_id));
        let ms = arguments["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.log
            .lock()
            .unwrap()
            .push(format!("end {}", ctx.request_id));
        Ok(json!({"slept_ms": ms}))
    }
}

/// Never finishes and never looks at `ctx.cancel`.
pub struct Stuck;

#[async_trait]
impl Tool for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }
    fn description(&self) -> &str {
        "Hangs"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}
