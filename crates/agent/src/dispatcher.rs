//! ToolDispatcher: resolve, validate, admit and execute one tool call.
//!
//! The dispatcher never retries a handler. Whether to try again is left to
//! the model through the `recoverable` flag on the returned error.

use crate::classify::classify;
use crate::rate_limit::{Admission, RateLimiter};
use crate::validate::validate_arguments;
use conduit_config::ToolsConfig;
use conduit_core::error::{ErrorCode, ToolError};
use conduit_core::tool::{
    ExecutionMetadata, ToolCallRequest, ToolContext, ToolRegistry, ToolResult,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    limiter: Arc<RateLimiter>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, limiter: Arc<RateLimiter>) -> Self {
        Self { registry, limiter }
    }

    /// Rate limits come from `[tools]`, one window per registered tool.
    pub fn from_config(registry: Arc<ToolRegistry>, config: &ToolsConfig) -> Self {
        let limiter = RateLimiter::from_config(&registry, config);
        Self::new(registry, Arc::new(limiter))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Execute one request and wrap whatever happens in a [`ToolResult`].
    ///
    /// `retry_count` is the number of earlier recoverable failures of this
    /// exact request (same tool, same arguments) in the turn. Once it reaches
    /// the tool's retry budget a further handler failure is reported as
    /// fatal. Rate-limit denials and argument errors are never downgraded.
    pub async fn dispatch(
        &self,
        request: &ToolCallRequest,
        ctx: &ToolContext,
        retry_count: u32,
    ) -> ToolResult {
        let started = Instant::now();
        let result = match self.run(request, ctx).await {
            Ok(payload) => ToolResult::success(request, payload),
            Err(error) => {
                let error = self.apply_retry_budget(request, error, retry_count);
                warn!(
                    session_id = %ctx.session_id,
                    request_id = %request.id,
                    tool = %request.name,
                    code = %error.code,
                    recoverable = error.recoverable,
                    "Tool call failed: {}",
                    error.message
                );
                ToolResult::failure(request, error)
            }
        };

        let metadata = ExecutionMetadata {
            duration_ms: started.elapsed().as_millis() as u64,
            retry_count,
        };
        info!(
            session_id = %ctx.session_id,
            request_id = %request.id,
            tool = %request.name,
            outcome = result.outcome.tag(),
            duration_ms = metadata.duration_ms,
            "Tool dispatched"
        );
        result.with_metadata(metadata)
    }

    async fn run(
        &self,
        request: &ToolCallRequest,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let Some(definition) = self.registry.get(&request.name) else {
            return Err(ToolError::new(
                ErrorCode::UnknownTool,
                format!("no tool named '{}'", request.name),
            )
            .with_remediation(format!(
                "use one of: {}",
                self.registry.names().join(", ")
            )));
        };

        validate_arguments(&definition.parameters, &request.arguments).map_err(|reason| {
            ToolError::new(ErrorCode::InvalidArgs, reason)
                .with_remediation("fix the arguments to match the tool's parameter schema")
        })?;

        if let Admission::Denied { retry_after_secs } = self.limiter.try_acquire(&request.name) {
            return Err(ToolError::rate_limited(
                format!("rate limit exceeded for '{}'", request.name),
                retry_after_secs,
            ));
        }

        debug!(
            request_id = %request.id,
            tool = %request.name,
            timeout_ms = definition.timeout.as_millis() as u64,
            "Invoking tool handler"
        );
        let handler = definition.handler.execute(request.arguments.clone(), ctx);
        match tokio::time::timeout(definition.timeout, handler).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => Err(classify(&err)),
            Err(_) => Err(ToolError::new(
                ErrorCode::Timeout,
                format!(
                    "'{}' did not finish within {}s",
                    request.name,
                    definition.timeout.as_secs_f64()
                ),
            )
            .with_remediation("retry with a smaller unit of work")),
        }
    }

    fn apply_retry_budget(
        &self,
        request: &ToolCallRequest,
        error: ToolError,
        retry_count: u32,
    ) -> ToolError {
        // The model fixes these by waiting or by changing the arguments.
        if matches!(error.code, ErrorCode::RateLimited | ErrorCode::InvalidArgs) {
            return error;
        }
        let Some(definition) = self.registry.get(&request.name) else {
            return error;
        };
        if error.recoverable && retry_count + 1 >= definition.retry.max_attempts {
            return error.fatal().with_remediation(format!(
                "retry budget for {} exhausted in this turn; do not call it again",
                request.name
            ));
        }
        error
    }
}
