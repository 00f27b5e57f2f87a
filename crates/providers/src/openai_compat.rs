//! OpenAI-compatible streaming transport.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions` with SSE streaming and function
//! calling.
//!
//! Tool-call argument fragments are accumulated by index and emitted as
//! complete [`TransportEvent::ToolCall`]s, in index order, when the stream
//! finishes.

use async_trait::async_trait;
use conduit_config::TransportConfig;
use conduit_core::error::TransportError;
use conduit_core::message::{Message, Role};
use conduit_core::tool::ToolCallRequest;
use conduit_core::transport::{
    ModelTransport, ToolSchema, TransportEvent, TransportRequest, TransportStream, Usage,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backoff::Backoff;

/// A streaming transport for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatTransport {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    backoff: Backoff,
}

impl OpenAiCompatTransport {
    /// Create a transport. `api_key` may be absent for local servers.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            backoff: Backoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        Ok(Self::new(
            "openai_compat",
            config.base_url.as_str(),
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_backoff(Backoff::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )))
    }

    /// Convert our messages to the chat completions format.
    ///
    /// Each run of tool-role messages becomes one assistant message carrying
    /// the `tool_calls` (merged into a directly preceding assistant text
    /// message when there is one), followed by one `tool` message per result.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        let mut out: Vec<ApiMessage> = Vec::with_capacity(messages.len());
        let mut i = 0;

        while i < messages.len() {
            let message = &messages[i];
            if message.role != Role::Tool {
                out.push(ApiMessage {
                    role: message.role.as_str().into(),
                    content: Some(message.text()),
                    tool_calls: None,
                    tool_call_id: None,
                });
                i += 1;
                continue;
            }

            let run_end = messages[i..]
                .iter()
                .position(|m| m.role != Role::Tool)
                .map_or(messages.len(), |offset| i + offset);
            let run = &messages[i..run_end];

            let calls: Vec<ApiToolCall> = run
                .iter()
                .filter_map(Message::tool_call)
                .map(|call| ApiToolCall {
                    id: call.id.clone(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect();

            match out.last_mut() {
                Some(prev) if prev.role == "assistant" && prev.tool_calls.is_none() => {
                    prev.tool_calls = Some(calls);
                }
                _ => out.push(ApiMessage {
                    role: "assistant".into(),
                    content: None,
                    tool_calls: Some(calls),
                    tool_call_id: None,
                }),
            }

            for m in run {
                let (Some(call), Some(result)) = (m.tool_call(), m.tool_result_block()) else {
                    continue;
                };
                out.push(ApiMessage {
                    role: "tool".into(),
                    content: Some(result.to_model_content()),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }

            i = run_end;
        }

        out
    }

    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &TransportRequest) -> Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// Send the request, retrying transient failures before any byte of the
    /// stream has been consumed.
    async fn send_with_retry(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0;

        loop {
            let mut builder = self
                .client
                .post(&url)
                .header("Accept", "text/event-stream")
                .json(body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(TransportError::StreamInterrupted("cancelled".into()));
                }
                result = builder.send() => result,
            };

            let (error, retry_after) = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => status_error(response).await,
                Err(e) => (request_error(e), None),
            };

            if !error.is_transient() || !self.backoff.should_retry(attempt) {
                warn!(transport = %self.name, attempt = attempt + 1, error = %error, "Transport request failed");
                return Err(error);
            }

            let delay = self.backoff.delay(attempt, retry_after);
            warn!(
                transport = %self.name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient transport failure, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(TransportError::StreamInterrupted("cancelled".into()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl ModelTransport for OpenAiCompatTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportStream, TransportError> {
        let body = Self::request_body(&request);
        debug!(
            transport = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self.send_with_retry(&body, &cancel).await?;

        let (tx, rx) = mpsc::channel(64);
        let transport = self.name.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    chunk = bytes.next() => chunk,
                };
                match chunk {
                    Some(Ok(chunk)) => {
                        for event in decoder.feed(&chunk) {
                            if tx.send(Ok(event)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        if decoder.is_finished() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(transport = %transport, error = %e, "Stream interrupted");
                        let _ = tx
                            .send(Err(TransportError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                    None => break,
                }
            }

            // Stream ended without [DONE]
            for event in decoder.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

async fn status_error(response: reqwest::Response) -> (TransportError, Option<Duration>) {
    let status = response.status().as_u16();
    match status {
        429 => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            (
                TransportError::RateLimited {
                    retry_after_secs: retry_after.unwrap_or(1),
                },
                retry_after.map(Duration::from_secs),
            )
        }
        401 | 403 => (
            TransportError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            None,
        ),
        _ => {
            let message = response.text().await.unwrap_or_default();
            (
                TransportError::ApiError {
                    status_code: status,
                    message,
                },
                None,
            )
        }
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Incremental SSE decoder for chat completion chunks.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
    finished: bool,
}

impl SseDecoder {
    /// Consume raw bytes and return the events they complete.
    fn feed(&mut self, bytes: &[u8]) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip blank lines, comments and non-data fields
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.extend(self.finish());
                return events;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(chunk) => self.apply(chunk, &mut events),
                Err(e) => trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk"),
            }
        }

        events
    }

    fn apply(&mut self, chunk: StreamResponse, events: &mut Vec<TransportEvent>) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                acc.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(TransportEvent::TextDelta { text });
        }
    }

    /// Flush accumulated tool calls in index order, then `Done`.
    fn finish(&mut self) -> Vec<TransportEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events: Vec<TransportEvent> = std::mem::take(&mut self.calls)
            .into_values()
            .map(|acc| TransportEvent::ToolCall {
                request: acc.into_request(),
            })
            .collect();
        events.push(TransportEvent::Done { usage: self.usage });
        events
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Unparseable arguments are passed through as a string so the
    /// dispatcher can reject them as invalid.
    fn into_request(self) -> ToolCallRequest {
        let arguments = if self.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };
        ToolCallRequest::new(self.id, self.name, arguments)
    }
}

// --- Chat completions API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::error::{ErrorCode, ToolError};
    use conduit_core::tool::ToolResult;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(uri: &str, max_retries: u32) -> OpenAiCompatTransport {
        OpenAiCompatTransport::new("test", uri, Some("sk-test".into()), Duration::from_secs(5))
            .unwrap()
            .with_backoff(Backoff::new(max_retries, Duration::from_millis(1)))
    }

    fn request() -> TransportRequest {
        TransportRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: 0.7,
            max_tokens: None,
        }
    }

    async fn collect(mut rx: TransportStream) -> Vec<Result<TransportEvent, TransportError>> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    fn sse(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("data: {l}\n\n")).collect()
    }

    #[test]
    fn plain_message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api = OpenAiCompatTransport::to_api_messages(&messages);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[1].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn tool_run_merges_into_preceding_assistant() {
        let a = ToolCallRequest::new("call_a", "file_read", serde_json::json!({"path": "a"}));
        let b = ToolCallRequest::new("call_b", "grep", serde_json::json!({"pattern": "x"}));
        let messages = vec![
            Message::user("look"),
            Message::assistant("checking both"),
            Message::tool_result(a.clone(), ToolResult::success(&a, serde_json::json!({"bytes": 3}))),
            Message::tool_result(
                b.clone(),
                ToolResult::failure(&b, ToolError::new(ErrorCode::InvalidArgs, "bad")),
            ),
            Message::assistant("done"),
        ];

        let api = OpenAiCompatTransport::to_api_messages(&messages);
        let roles: Vec<&str> = api.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "tool", "assistant"]);

        let calls = api[1].tool_calls.as_ref().unwrap();
        assert_eq!(api[1].content.as_deref(), Some("checking both"));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].function.name, "grep");
        assert_eq!(calls[0].function.arguments, r#"{"path":"a"}"#);

        assert_eq!(api[2].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(api[2].content.as_deref(), Some(r#"{"bytes":3}"#));
        assert!(api[3].content.as_deref().unwrap().contains("ERROR_INVALID_ARGS"));
    }

    #[test]
    fn tool_run_without_assistant_text_gets_its_own_call_message() {
        let a = ToolCallRequest::new("call_a", "calculator", serde_json::json!({"expression": "1"}));
        let messages = vec![
            Message::user("compute"),
            Message::tool_result(a.clone(), ToolResult::success(&a, serde_json::json!(1))),
        ];
        let api = OpenAiCompatTransport::to_api_messages(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[1].role, "assistant");
        assert!(api[1].content.is_none());
        assert_eq!(api[1].tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolSchema {
            name: "bash_exec".into(),
            description: "Run a shell command".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api = OpenAiCompatTransport::to_api_tools(&tools);
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].function.name, "bash_exec");
        assert_eq!(api[0].r#type, "function");
    }

    #[test]
    fn request_body_includes_tools_only_when_present() {
        let mut req = request();
        let body = OpenAiCompatTransport::request_body(&req);
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());

        req.tools.push(ToolSchema {
            name: "grep".into(),
            description: "search".into(),
            parameters: serde_json::json!({"type": "object"}),
        });
        req.max_tokens = Some(256);
        let body = OpenAiCompatTransport::request_body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "grep");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn decoder_handles_split_lines_and_utf8() {
        let mut decoder = SseDecoder::default();
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n\n";
        let bytes = payload.as_bytes();
        // Split in the middle of the two-byte 'é'
        let split = payload.find('é').unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        let events = decoder.feed(&bytes[split..]);
        assert_eq!(
            events,
            vec![TransportEvent::TextDelta {
                text: "héllo".into()
            }]
        );
    }

    #[test]
    fn decoder_accumulates_tool_calls_in_index_order() {
        let mut decoder = SseDecoder::default();
        let body = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"grep","arguments":"{\"pattern\""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"file_read","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":":\"x\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":\"a\"}"}}]}}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
            "[DONE]",
        ]);

        let events = decoder.feed(body.as_bytes());
        assert_eq!(events.len(), 3);
        match (&events[0], &events[1]) {
            (
                TransportEvent::ToolCall { request: first },
                TransportEvent::ToolCall { request: second },
            ) => {
                assert_eq!(first.id, "call_a");
                assert_eq!(first.arguments, serde_json::json!({"path": "a"}));
                assert_eq!(second.id, "call_b");
                assert_eq!(second.arguments, serde_json::json!({"pattern": "x"}));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(
            events[2],
            TransportEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15
                })
            }
        );
        assert!(decoder.is_finished());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn decoder_ignores_comments_and_garbage() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\n\ndata: not json\n\nevent: ping\n\n");
        assert!(events.is_empty());
        assert!(!decoder.is_finished());
    }

    #[test]
    fn malformed_arguments_pass_through_as_string() {
        let acc = ToolCallAccumulator {
            id: "c1".into(),
            name: "grep".into(),
            arguments: "{not json".into(),
        };
        let req = acc.into_request();
        assert_eq!(req.arguments, Value::String("{not json".into()));

        let empty = ToolCallAccumulator {
            id: "c2".into(),
            name: "list_dir".into(),
            arguments: String::new(),
        };
        assert_eq!(empty.into_request().arguments, serde_json::json!({}));
    }

    #[tokio::test]
    async fn streams_text_over_http() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let rx = transport(&server.uri(), 0)
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<TransportEvent> =
            collect(rx).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::TextDelta { text: "Hel".into() },
                TransportEvent::TextDelta { text: "lo".into() },
                TransportEvent::Done { usage: None },
            ]
        );
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse(&["[DONE]"]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let rx = transport(&server.uri(), 2)
            .stream(request(), CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(TransportEvent::Done { .. })));
    }

    #[tokio::test]
    async fn server_errors_exhaust_bounded_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let err = transport(&server.uri(), 2)
            .stream(request(), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            TransportError::ApiError {
                status_code: 503,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(&server.uri(), 3)
            .stream(request(), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::AuthenticationFailed(_)));
    }

    #[test]
    fn from_config_trims_base_url() {
        let config = TransportConfig {
            base_url: "http://localhost:11434/v1/".into(),
            ..TransportConfig::default()
        };
        let t = OpenAiCompatTransport::from_config(&config).unwrap();
        assert_eq!(t.base_url, "http://localhost:11434/v1");
        assert_eq!(t.backoff.max_retries, config.max_retries);
    }
}
