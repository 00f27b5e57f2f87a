//! The orchestration core of conduit.
//!
//! One turn runs as follows:
//!
//! 1. **Append** the user message to the session's context window
//! 2. **Stream** the context to the model, forwarding text as it arrives
//! 3. **Dispatch** requested tool calls (validated, rate limited, timed out)
//! 4. **Fold** results back into the context in emission order, then go to 2
//! 5. **Commit** the turn to the session store once the model stops calling tools
//!
//! Failures anywhere in the turn roll the context back and surface as a
//! structured [`TurnEvent::TurnFailed`].

pub mod classify;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod rate_limit;
pub mod turn_event;
pub mod validate;

#[cfg(test)]
mod test_helpers;

pub use classify::classify;
pub use context::{ContextBudget, ContextWindow};
pub use controller::{
    ActiveSession, ControllerConfig, ConversationController, TurnState, TurnSummary,
};
pub use dispatcher::ToolDispatcher;
pub use rate_limit::{Admission, RateLimit, RateLimiter};
pub use turn_event::TurnEvent;
pub use validate::validate_arguments;
