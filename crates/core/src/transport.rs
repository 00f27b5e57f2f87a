//! Model transport contract: the streaming boundary to the LLM backend.
//!
//! The orchestration core hands the transport the current context and the
//! registered tool schemas, and consumes a stream of [`TransportEvent`]s.
//! Provider-level retry/backoff lives behind this trait; the core only sees
//! a terminal failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::message::Message;
use crate::tool::ToolCallRequest;

/// One request to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The ordered context
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single event on the model stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Partial assistant text
    TextDelta { text: String },

    /// A complete tool-call request
    ToolCall { request: ToolCallRequest },

    /// The model finished this response
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

pub type TransportStream = mpsc::Receiver<Result<TransportEvent, TransportError>>;

/// The streaming model backend.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// A human-readable name (e.g., "openai").
    fn name(&self) -> &str;

    /// Start a streamed completion.
    ///
    /// The returned channel yields events until `Done`, an error, or close.
    /// Implementations stop producing once `cancel` fires.
    async fn stream(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError>;
}
