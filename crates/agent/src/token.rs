//! Token estimates for when a provider reports no usage.
//!
//! Character heuristic: about four characters per token, rounded up.

use codeclaw_core::message::Message;
use codeclaw_core::provider::ToolDefinition;

/// Per-message overhead for role and delimiters.
const MESSAGE_OVERHEAD: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

/// Estimated prompt size of a request.
pub fn estimate_request_tokens(messages: &[Message], tools: &[ToolDefinition]) -> u32 {
    let total = estimate_messages_tokens(messages) + estimate_tools_tokens(tools);
    u32::try_from(total).unwrap_or(u32::MAX)
}
