//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! operator types a line → Agent builds a request → Provider generates a response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::Usage;

/// Metadata key marking how an assistant placeholder was finalized.
pub const STATUS_KEY: &str = "status";
/// Status value for a turn that was stopped by the operator.
pub const STATUS_STOPPED: &str = "stopped";
/// Status value for a turn that ended in a transport error.
pub const STATUS_ERROR: &str = "error";
/// Metadata key marking a user message the agent injected to resume a
/// truncated answer.
pub const CONTINUATION_KEY: &str = "continuation";

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The operator
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (rules, project summary, tool catalog)
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any), in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Token usage, attached to the terminal assistant message of a turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (provider info, placeholder status, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            usage: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        let mut msg = Self::assistant(content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// An assistant placeholder finalized with a status marker.
    pub fn placeholder(content: impl Into<String>, status: &str) -> Self {
        let mut msg = Self::assistant(content);
        msg.metadata
            .insert(STATUS_KEY.into(), serde_json::Value::String(status.into()));
        msg
    }

    /// The placeholder status, if any.
    pub fn status(&self) -> Option<&str> {
        self.metadata.get(STATUS_KEY).and_then(|v| v.as_str())
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == Some(STATUS_STOPPED)
    }

    /// A user-role message asking the model to resume a cut-off answer.
    pub fn continuation(content: impl Into<String>) -> Self {
        let mut msg = Self::user(content);
        msg.metadata
            .insert(CONTINUATION_KEY.into(), serde_json::Value::Bool(true));
        msg
    }

    pub fn is_continuation(&self) -> bool {
        self.metadata
            .get(CONTINUATION_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// A message the operator typed, which opens a turn.
    pub fn starts_turn(&self) -> bool {
        self.role == Role::User && !self.is_continuation()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// A conversation is an ordered sequence of messages with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Append several messages in order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Install or replace the leading system message.
    pub fn set_system_prompt(&mut self, prompt: &str) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = prompt.to_string();
                first.timestamp = Utc::now();
            }
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    /// The leading system prompt, if one has been installed.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Keep the system prompt and only the last `turns` whole turns.
    ///
    /// A turn starts at an operator's user message, so cutting there never
    /// separates an assistant tool-call message from its tool results or a
    /// continuation from the answer it resumes.
    pub fn retain_recent_turns(&mut self, turns: usize) -> usize {
        let starts: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.starts_turn())
            .map(|(i, _)| i)
            .collect();
        if starts.len() <= turns {
            return 0;
        }
        let cut = starts[starts.len() - turns.max(1)];
        let cut = if turns == 0 { self.messages.len() } else { cut };
        let head = usize::from(self.system_prompt().is_some());
        if cut <= head {
            return 0;
        }
        let removed = cut - head;
        self.messages.drain(head..cut);
        self.updated_at = Utc::now();
        removed
    }

    /// Check the tool pairing invariant: every assistant message with N tool
    /// calls is immediately followed by N tool messages answering those calls
    /// in the same order. Returns a description of the first violation.
    pub fn tool_pairing_violation(&self) -> Option<String> {
        let mut i = 0;
        while i < self.messages.len() {
            let msg = &self.messages[i];
            if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
                for (offset, call) in msg.tool_calls.iter().enumerate() {
                    let Some(reply) = self.messages.get(i + 1 + offset) else {
                        return Some(format!("tool call '{}' has no result", call.id));
                    };
                    if reply.role != Role::Tool || reply.tool_call_id.as_deref() != Some(&call.id)
                    {
                        return Some(format!(
                            "message {} should answer tool call '{}'",
                            i + 1 + offset,
                            call.id
                        ));
                    }
                }
                i += 1 + msg.tool_calls.len();
            } else {
                if msg.role == Role::Tool {
                    return Some(format!("orphan tool message at {i}"));
                }
                i += 1;
            }
        }
        None
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
