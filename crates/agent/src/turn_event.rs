//! Events streamed out of a running turn.
//!
//! A turn emits text deltas as they arrive, a request/result pair for every
//! tool call, and ends with exactly one of `turn_complete` or
//! `turn_failed`.

use conduit_core::error::ErrorCode;
use conduit_core::tool::ToolOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial assistant text, forwarded unbuffered.
    TextDelta { text: String },

    /// The model asked for a tool.
    ToolCallRequest {
        request_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A dispatched call finished.
    ToolResult {
        request_id: String,
        tool_name: String,
        outcome: ToolOutcome,
        duration_ms: u64,
    },

    /// The turn was committed.
    TurnComplete {
        session_id: String,
        messages_added: usize,
        token_count: usize,
    },

    /// The turn ended without committing anything.
    TurnFailed { code: ErrorCode, message: String },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallRequest { .. } => "tool_call_request",
            Self::ToolResult { .. } => "tool_result",
            Self::TurnComplete { .. } => "turn_complete",
            Self::TurnFailed { .. } => "turn_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnComplete { .. } | Self::TurnFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = TurnEvent::TextDelta {
            text: "Hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "Hello");
        assert_eq!(event.event_type(), "text_delta");
    }

    #[test]
    fn failure_carries_wire_code() {
        let event = TurnEvent::TurnFailed {
            code: ErrorCode::ToolLoopExceeded,
            message: "too many iterations".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["code"], "ERROR_TOOL_LOOP_EXCEEDED");
        assert!(event.is_terminal());
    }

    #[test]
    fn tool_result_embeds_outcome() {
        let event = TurnEvent::ToolResult {
            request_id: "c1".into(),
            tool_name: "file_read".into(),
            outcome: ToolOutcome::Success {
                payload: serde_json::json!({"bytes": 245}),
            },
            duration_ms: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["outcome"]["status"], "success");
        assert!(!event.is_terminal());
    }
}
