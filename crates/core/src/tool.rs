//! Tool contract: the uniform abstraction over agent capabilities.
//!
//! Every capability (shell, file I/O, search, compute) implements [`Tool`].
//! Tools are collected into an immutable [`ToolRegistry`] at startup; the
//! registry is never mutated afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorCode, ToolError};
use crate::transport::ToolSchema;

/// Default per-call timeout for a tool handler.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A model's request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within a turn (matches the model's tool_call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments; expected to be a JSON object
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    RecoverableError { error: ToolError },
    FatalError { error: ToolError },
}

impl ToolOutcome {
    /// Pick the error variant from the error's recoverable flag.
    pub fn from_error(error: ToolError) -> Self {
        if error.recoverable {
            Self::RecoverableError { error }
        } else {
            Self::FatalError { error }
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RecoverableError { .. } => "recoverable_error",
            Self::FatalError { .. } => "fatal_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&ToolError> {
        match self {
            Self::Success { .. } => None,
            Self::RecoverableError { error } | Self::FatalError { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub duration_ms: u64,
    pub retry_count: u32,
}

/// The structured outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The request this result answers
    pub request_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub metadata: ExecutionMetadata,
}

impl ToolResult {
    pub fn success(request: &ToolCallRequest, payload: Value) -> Self {
        Self {
            request_id: request.id.clone(),
            tool_name: request.name.clone(),
            outcome: ToolOutcome::Success { payload },
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn failure(request: &ToolCallRequest, error: ToolError) -> Self {
        Self {
            request_id: request.id.clone(),
            tool_name: request.name.clone(),
            outcome: ToolOutcome::from_error(error),
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.outcome.error().map(|e| e.code)
    }

    /// The text the model sees for this result.
    pub fn to_model_content(&self) -> String {
        let body = match &self.outcome {
            ToolOutcome::Success { payload } => payload.clone(),
            ToolOutcome::RecoverableError { error } | ToolOutcome::FatalError { error } => {
                serde_json::json!({
                    "error": {
                        "code": error.code,
                        "message": error.message,
                        "recoverable": error.recoverable,
                        "remediation": error.remediation,
                        "retry_after_secs": error.retry_after_secs,
                    }
                })
            }
        };
        match body {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

/// Per-invocation context handed to a tool handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub request_id: String,
    /// Fires when the turn is cancelled. Handlers should stop promptly.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: request_id.into(),
            cancel,
        }
    }

    /// A context with a fresh token, for direct invocation outside a turn.
    pub fn detached(request_id: impl Into<String>) -> Self {
        Self::new("", request_id, CancellationToken::new())
    }
}

/// The core Tool trait.
///
/// Handlers return a JSON payload on success or a raw error on failure.
/// Raw errors are classified by the dispatcher; handlers do not pick codes.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash_exec", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Whether calls must be serialized relative to other order-sensitive
    /// calls within a turn.
    fn order_sensitive(&self) -> bool {
        false
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> anyhow::Result<Value>;

    /// The schema advertised to the model.
    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// How many times the model may try a tool within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// A registered tool: its advertised contract plus its handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub order_sensitive: bool,
    pub handler: Arc<dyn Tool>,
}

impl ToolDefinition {
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("order_sensitive", &self.order_sensitive)
            .finish_non_exhaustive()
    }
}

/// An immutable name → definition mapping.
///
/// Ordered by name so the tool list sent to the model is stable.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Schemas for every tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(ToolDefinition::schema).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Collects tools, then freezes them into a [`ToolRegistry`].
pub struct ToolRegistryBuilder {
    default_timeout: Duration,
    timeouts: HashMap<String, Duration>,
    retry: RetryPolicy,
    tools: Vec<Arc<dyn Tool>>,
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            timeouts: HashMap::new(),
            retry: RetryPolicy::default(),
            tools: Vec::new(),
        }
    }
}

impl ToolRegistryBuilder {
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the timeout for one tool name.
    pub fn timeout_for(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(name.into(), timeout);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn register(self, tool: impl Tool + 'static) -> Self {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Freeze the registry. Fails if two tools share a name.
    pub fn build(self) -> Result<ToolRegistry, Error> {
        let mut tools = BTreeMap::new();
        for handler in self.tools {
            let name = handler.name().to_string();
            if tools.contains_key(&name) {
                return Err(Error::DuplicateTool(name));
            }
            let timeout = self
                .timeouts
                .get(&name)
                .copied()
                .unwrap_or(self.default_timeout);
            let definition = ToolDefinition {
                name: name.clone(),
                description: handler.description().to_string(),
                parameters: handler.parameters_schema(),
                timeout,
                retry: self.retry,
                order_sensitive: handler.order_sensitive(),
                handler,
            };
            tools.insert(name, definition);
        }
        Ok(ToolRegistry { tools })
    }
}
