//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of deltas. Every request
//! carries a [`CancellationToken`]; cancelling it closes the response body and
//! the call returns [`ProviderError::Cancelled`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            top_p: None,
            max_tokens: None,
            tools: Vec::new(),
            stream: false,
            stop: Vec::new(),
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    /// Output was truncated by the token limit.
    Length,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    /// Map a wire value from either dialect.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    #[serde(default)]
    pub finish_reason: FinishReason,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Rate-limit snapshot parsed from response headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    pub remaining_requests: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub requests_reset_at: Option<DateTime<Utc>>,
    pub tokens_reset_at: Option<DateTime<Utc>>,
}

impl RateLimits {
    pub fn is_empty(&self) -> bool {
        self == &RateLimits::default()
    }
}

/// A single chunk in a streaming response.
///
/// Content and thinking are deltas. Tool calls are delivered fully assembled,
/// in the order the model opened them, on the final chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial reasoning delta; never stored in the transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receiving half of a stream opened by [`Provider::stream`].
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// Observer for streamed deltas: `(content, thinking, done)`.
pub type DeltaCallback<'a> = &'a (dyn Fn(&str, &str, bool) + Send + Sync);

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `stream_with_callback()` without
/// knowing which backend or wire dialect is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request, cancel).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                thinking: None,
                tool_calls: response.message.tool_calls,
                done: true,
                finish_reason: Some(response.finish_reason),
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Stream a request, forwarding deltas to `on_delta` and assembling the
    /// final response.
    ///
    /// `on_delta` sees `done = true` exactly once, on every exit path
    /// including open failures and cancellation. Dropping the receiver on
    /// cancel closes the underlying body.
    async fn stream_with_callback(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
        on_delta: DeltaCallback<'_>,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let outcome = match self.stream(request, cancel).await {
            Ok(rx) => collect_stream(rx, model, cancel, on_delta).await,
            Err(e) => Err(e),
        };
        on_delta("", "", true);
        outcome
    }

    /// Most recent rate-limit snapshot, if the backend reports one.
    fn rate_limits(&self) -> Option<RateLimits> {
        None
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Drain `rx` into a [`ProviderResponse`], forwarding content and thinking
/// deltas to `on_delta` with `done = false`.
///
/// The terminal `done = true` is left to the caller, so a caller retrying
/// across models can still signal it once. Cancellation drops `rx`.
pub async fn collect_stream(
    mut rx: ChunkReceiver,
    model: String,
    cancel: &CancellationToken,
    on_delta: DeltaCallback<'_>,
) -> std::result::Result<ProviderResponse, ProviderError> {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    let mut finish_reason = FinishReason::Stop;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            next = rx.recv() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let delta = chunk.content.as_deref().unwrap_or_default();
                let thinking = chunk.thinking.as_deref().unwrap_or_default();
                if !delta.is_empty() || !thinking.is_empty() {
                    on_delta(delta, thinking, false);
                }
                content.push_str(delta);
                tool_calls.extend(chunk.tool_calls);
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }
                if let Some(reason) = chunk.finish_reason {
                    finish_reason = reason;
                }
                if chunk.done {
                    break;
                }
            }
            Some(Err(e)) => return Err(e),
            // Sender dropped without a terminal chunk.
            None => {
                return Err(ProviderError::StreamInterrupted(
                    "stream closed before completion".into(),
                ));
            }
        }
    }

    if !tool_calls.is_empty() && finish_reason == FinishReason::Stop {
        finish_reason = FinishReason::ToolCalls;
    }
    Ok(ProviderResponse {
        message: Message::assistant_with_tools(content, tool_calls),
        usage,
        model,
        finish_reason,
        metadata: serde_json::Map::new(),
    })
}
