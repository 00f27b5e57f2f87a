//! Token estimation.
//!
//! Character heuristic: about 4 characters per token, rounded up. Close
//! enough for BPE tokenizers on English text and fully deterministic, which
//! compaction relies on.

use conduit_core::message::{ContentBlock, Message};
use conduit_core::transport::ToolSchema;

/// Per-message framing cost (role, delimiters) in the wire format.
pub const MESSAGE_OVERHEAD: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

fn estimate_block_tokens(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => estimate_tokens(text),
        ContentBlock::ToolCall(call) => {
            estimate_tokens(&call.id)
                + estimate_tokens(&call.name)
                + estimate_tokens(&call.arguments.to_string())
        }
        ContentBlock::ToolResult(result) => estimate_tokens(&result.to_model_content()),
    }
}

/// Estimate tokens for a single message including framing overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + message.content.iter().map(estimate_block_tokens).sum::<usize>()
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for the tool schemas sent with every request.
pub fn estimate_tools_tokens(tools: &[ToolSchema]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}
