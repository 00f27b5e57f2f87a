//! ConversationController: drives one user turn to completion.
//!
//! A turn is a small state machine:
//!
//! ```text
//! AwaitingModel ──(tool calls)──▶ DispatchingTools ──▶ FoldingResults ─┐
//!       ▲                                                              │
//!       └──────────────────────────────────────────────────────────────┘
//!       │
//!       └──(no tool calls)──▶ Done
//! ```
//!
//! The only suspension points are the model stream and tool completion.
//! Any error leaves the loop as a failed turn: the context window is rolled
//! back to where it was before the turn and nothing is persisted. A
//! successful turn is committed to the store in one `append_turn` call.

use crate::context::{Appended, ContextBudget, ContextWindow};
use crate::dispatcher::ToolDispatcher;
use crate::turn_event::TurnEvent;
use chrono::Utc;
use conduit_config::AppConfig;
use conduit_core::error::Error;
use conduit_core::event::{DomainEvent, EventBus};
use conduit_core::message::Message;
use conduit_core::session::{SessionId, SessionStore};
use conduit_core::tool::{ToolCallRequest, ToolContext, ToolOutcome, ToolResult};
use conduit_core::transport::{ModelTransport, TransportEvent, TransportRequest};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Policy for the turn loop.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    /// Tool rounds allowed in one turn
    pub max_tool_iterations: usize,
    pub budget: ContextBudget,
}

impl ControllerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            model: config.transport.model.clone(),
            temperature: config.transport.temperature,
            max_tokens: config.transport.max_tokens,
            system_prompt: config.agent.system_prompt.clone(),
            max_tool_iterations: config.agent.max_tool_iterations,
            budget: ContextBudget {
                max_tokens: config.context.max_tokens,
                pinned_recent_turns: config.context.pinned_recent_turns,
            },
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// A session opened for turns: its id plus the in-memory context view.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    id: SessionId,
    window: ContextWindow,
}

impl ActiveSession {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }
}

/// Where a turn currently is.
#[derive(Debug)]
pub enum TurnState {
    AwaitingModel,
    DispatchingTools(Vec<ToolCallRequest>),
    FoldingResults(Vec<(ToolCallRequest, ToolResult)>),
    Done,
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingModel => "awaiting_model",
            Self::DispatchingTools(_) => "dispatching_tools",
            Self::FoldingResults(_) => "folding_results",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub session_id: SessionId,
    /// Messages the turn produced, not counting the user's input.
    pub messages_added: usize,
    /// Combined token cost of those messages.
    pub tokens_added: usize,
    /// Context window total after the turn.
    pub token_count: usize,
    /// Tool rounds used.
    pub iterations: usize,
}

/// Mutable bookkeeping for one turn.
#[derive(Default)]
struct TurnLog {
    messages: Vec<Message>,
    call_ids: HashSet<String>,
    /// Recoverable failures so far, per distinct request
    failures: HashMap<AttemptKey, u32>,
    iterations: usize,
}

/// A request is the same attempt when both the tool and its arguments match.
type AttemptKey = (String, String);

fn attempt_key(request: &ToolCallRequest) -> AttemptKey {
    (request.name.clone(), request.arguments.to_string())
}

/// One model response: the text it streamed and the tools it asked for.
struct ModelResponse {
    text: String,
    calls: Vec<ToolCallRequest>,
}

pub struct ConversationController {
    transport: Arc<dyn ModelTransport>,
    dispatcher: ToolDispatcher,
    store: Arc<dyn SessionStore>,
    config: ControllerConfig,
    events: Option<EventBus>,
}

impl ConversationController {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        dispatcher: ToolDispatcher,
        store: Arc<dyn SessionStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            store,
            config,
            events: None,
        }
    }

    /// Publish domain events to `bus` as turns progress.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Resume `id`, or create a fresh session when `id` is `None`.
    pub async fn open_session(&self, id: Option<&SessionId>) -> Result<ActiveSession, Error> {
        let session = match id {
            Some(id) => self.store.load_session(id).await?,
            None => self.store.create_session().await?,
        };
        let window = ContextWindow::from_history(
            self.config.budget,
            Some(self.config.system_prompt.as_str()),
            &session.messages,
        );
        info!(
            session_id = %session.id,
            messages = session.messages.len(),
            evicted = window.evicted(),
            resumed = id.is_some(),
            "Session opened"
        );
        Ok(ActiveSession {
            id: session.id,
            window,
        })
    }

    /// Run one turn for `input`, streaming progress to `events`.
    ///
    /// On success the turn's messages are committed and `TurnComplete` is
    /// the last event. On failure the session's context is restored, nothing
    /// is committed, and `TurnFailed` is the last event.
    pub async fn run_turn(
        &self,
        session: &mut ActiveSession,
        input: &str,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnSummary, Error> {
        let snapshot = session.window.clone();
        info!(session_id = %session.id, "Turn started");

        match self.drive(session, input, events, cancel).await {
            Ok(summary) => {
                emit(
                    events,
                    TurnEvent::TurnComplete {
                        session_id: summary.session_id.to_string(),
                        messages_added: summary.messages_added,
                        token_count: summary.token_count,
                    },
                )
                .await;
                self.publish(DomainEvent::TurnCompleted {
                    session_id: summary.session_id.to_string(),
                    messages_added: summary.messages_added,
                    token_count: summary.token_count,
                    iterations: summary.iterations,
                    timestamp: Utc::now(),
                });
                info!(
                    session_id = %summary.session_id,
                    messages_added = summary.messages_added,
                    token_count = summary.token_count,
                    iterations = summary.iterations,
                    "Turn completed"
                );
                Ok(summary)
            }
            Err(err) => {
                session.window = snapshot;
                let code = err.code();
                error!(session_id = %session.id, code = %code, "Turn failed: {err}");
                emit(
                    events,
                    TurnEvent::TurnFailed {
                        code,
                        message: err.to_string(),
                    },
                )
                .await;
                self.publish(DomainEvent::TurnFailed {
                    session_id: session.id.to_string(),
                    code,
                    message: err.to_string(),
                    timestamp: Utc::now(),
                });
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut ActiveSession,
        input: &str,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnSummary, Error> {
        let mut log = TurnLog::default();
        self.append(session, &mut log, Message::user(input))?;

        let mut state = TurnState::AwaitingModel;
        loop {
            debug!(
                session_id = %session.id,
                state = state.name(),
                iteration = log.iterations,
                "Turn step"
            );
            state = match state {
                TurnState::AwaitingModel => {
                    let response = self.stream_round(session, &mut log, events, cancel).await?;
                    if !response.text.is_empty() {
                        self.append(session, &mut log, Message::assistant(response.text))?;
                    }
                    if response.calls.is_empty() {
                        TurnState::Done
                    } else {
                        log.iterations += 1;
                        if log.iterations > self.config.max_tool_iterations {
                            return Err(Error::ToolLoopExceeded {
                                max_iterations: self.config.max_tool_iterations,
                            });
                        }
                        TurnState::DispatchingTools(response.calls)
                    }
                }
                TurnState::DispatchingTools(calls) => {
                    let results = self.dispatch_all(session, &log, &calls, cancel).await;
                    if cancel.is_cancelled() {
                        // Calls that ran still get reported; none are folded.
                        for result in &results {
                            self.report(session, events, result).await;
                        }
                        return Err(Error::Cancelled);
                    }
                    TurnState::FoldingResults(calls.into_iter().zip(results).collect())
                }
                TurnState::FoldingResults(pairs) => {
                    for (request, result) in pairs {
                        self.fold(session, &mut log, events, request, result).await?;
                    }
                    TurnState::AwaitingModel
                }
                TurnState::Done => break,
            };
        }

        // The user message is committed with the turn but is not part of
        // what the turn produced.
        let produced = &log.messages[1..];
        let summary = TurnSummary {
            session_id: session.id.clone(),
            messages_added: produced.len(),
            tokens_added: produced.iter().map(|m| m.token_cost).sum(),
            token_count: session.window.token_count(),
            iterations: log.iterations,
        };
        self.store.append_turn(&session.id, &log.messages).await?;
        Ok(summary)
    }

    /// Send the current context and consume one streamed response.
    async fn stream_round(
        &self,
        session: &ActiveSession,
        log: &mut TurnLog,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, Error> {
        let request = TransportRequest {
            model: self.config.model.clone(),
            messages: session.window.messages().to_vec(),
            tools: self.dispatcher.registry().schemas(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        debug!(
            session_id = %session.id,
            messages = request.messages.len(),
            context_tokens = session.window.token_count(),
            "Requesting model response"
        );

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            opened = self.transport.stream(request, cancel.clone()) => opened?,
        };

        let mut response = ModelResponse {
            text: String::new(),
            calls: Vec::new(),
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.recv() => next,
            };
            match next {
                Some(Ok(TransportEvent::TextDelta { text })) => {
                    response.text.push_str(&text);
                    emit(events, TurnEvent::TextDelta { text }).await;
                }
                Some(Ok(TransportEvent::ToolCall { mut request })) => {
                    if request.id.is_empty() || !log.call_ids.insert(request.id.clone()) {
                        let fresh = format!("call_{}", Uuid::new_v4().simple());
                        warn!(
                            session_id = %session.id,
                            original = %request.id,
                            request_id = %fresh,
                            "Reassigned missing or duplicate tool call id"
                        );
                        log.call_ids.insert(fresh.clone());
                        request.id = fresh;
                    }
                    emit(
                        events,
                        TurnEvent::ToolCallRequest {
                            request_id: request.id.clone(),
                            name: request.name.clone(),
                            arguments: request.arguments.clone(),
                        },
                    )
                    .await;
                    response.calls.push(request);
                }
                Some(Ok(TransportEvent::Done { usage })) => {
                    if let Some(usage) = usage {
                        debug!(
                            session_id = %session.id,
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "Model usage"
                        );
                    }
                    break;
                }
                Some(Err(err)) => return Err(err.into()),
                // A stream that closes without Done ends the response.
                None => break,
            }
        }
        Ok(response)
    }

    /// Run every call of one round. Calls to order-sensitive tools run one
    /// at a time in emission order; the rest run concurrently alongside
    /// them. Results come back in emission order.
    async fn dispatch_all(
        &self,
        session: &ActiveSession,
        log: &TurnLog,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let (serial, parallel): (Vec<usize>, Vec<usize>) = (0..calls.len()).partition(|&i| {
            self.dispatcher
                .registry()
                .get(&calls[i].name)
                .is_some_and(|def| def.order_sensitive)
        });

        let run = |index: usize| {
            let request = &calls[index];
            let ctx = ToolContext::new(session.id.as_str(), &request.id, cancel.clone());
            let retry_count = log.failures.get(&attempt_key(request)).copied().unwrap_or(0);
            async move { (index, self.dispatcher.dispatch(request, &ctx, retry_count).await) }
        };

        let concurrent = join_all(parallel.into_iter().map(&run));
        let sequential = async {
            let mut done = Vec::with_capacity(serial.len());
            for index in serial {
                done.push(run(index).await);
            }
            done
        };
        let (concurrent, sequential) = tokio::join!(concurrent, sequential);

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        for (index, result) in concurrent.into_iter().chain(sequential) {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    /// Fold one result into the context as a tool-role message.
    async fn fold(
        &self,
        session: &mut ActiveSession,
        log: &mut TurnLog,
        events: &mpsc::Sender<TurnEvent>,
        request: ToolCallRequest,
        result: ToolResult,
    ) -> Result<(), Error> {
        if matches!(result.outcome, ToolOutcome::RecoverableError { .. }) {
            *log.failures.entry(attempt_key(&request)).or_default() += 1;
        }
        self.report(session, events, &result).await;
        self.append(session, log, Message::tool_result(request, result))
    }

    /// Tell the caller and the bus how one call ended.
    async fn report(
        &self,
        session: &ActiveSession,
        events: &mpsc::Sender<TurnEvent>,
        result: &ToolResult,
    ) {
        emit(
            events,
            TurnEvent::ToolResult {
                request_id: result.request_id.clone(),
                tool_name: result.tool_name.clone(),
                outcome: result.outcome.clone(),
                duration_ms: result.metadata.duration_ms,
            },
        )
        .await;
        self.publish(DomainEvent::ToolDispatched {
            session_id: session.id.to_string(),
            request_id: result.request_id.clone(),
            tool_name: result.tool_name.clone(),
            outcome: result.outcome.tag().to_string(),
            code: result.error_code(),
            duration_ms: result.metadata.duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn append(
        &self,
        session: &mut ActiveSession,
        log: &mut TurnLog,
        message: Message,
    ) -> Result<(), Error> {
        let Appended {
            message,
            compaction,
        } = session.window.append(message)?;
        if let Some(compaction) = compaction {
            info!(
                session_id = %session.id,
                evicted = compaction.evicted,
                tokens_before = compaction.tokens_before,
                tokens_after = compaction.tokens_after,
                "Context compacted"
            );
            self.publish(DomainEvent::ContextCompacted {
                session_id: session.id.to_string(),
                evicted: compaction.evicted,
                tokens_before: compaction.tokens_before,
                tokens_after: compaction.tokens_after,
                timestamp: Utc::now(),
            });
        }
        log.messages.push(message);
        Ok(())
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// Forward an event to the caller. A dropped receiver only stops rendering.
async fn emit(events: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    if events.send(event).await.is_err() {
        debug!("Turn event receiver dropped");
    }
}
