//! OpenAI-compatible dialect.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Groq, Ollama, vLLM, and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Indexed `tool_calls` deltas
//! - `reasoning_content` / `reasoning` deltas as thinking
//! - `x-ratelimit-*` headers

use chrono::Utc;
use codeclaw_core::error::ProviderError;
use codeclaw_core::message::{Message, MessageToolCall, Role};
use codeclaw_core::provider::*;
use reqwest::RequestBuilder;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, SseEvent, ToolCallFragment, header_str};
use crate::ratelimit::{header_u64, reset_after};

/// Chat Completions wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiDialect;

impl OpenAiDialect {
    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: if m.role == Role::Assistant && m.content.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                },
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
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
}

fn to_usage(u: &ApiUsage) -> Usage {
    Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    }
}

impl Dialect for OpenAiDialect {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn apply_headers(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        if api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {api_key}"))
        }
    }

    fn build_request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    fn parse_response_body(&self, body: &[u8]) -> Result<ProviderResponse, ProviderError> {
        let api_response: ApiResponse =
            serde_json::from_slice(body).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_wire)
            .unwrap_or(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            });

        let message = Message::assistant_with_tools(choice.message.content.unwrap_or_default(), tool_calls);

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.as_ref().map(to_usage),
            model: api_response.model,
            finish_reason,
            metadata: serde_json::Map::new(),
        })
    }

    fn parse_sse_data(&self, _event: Option<&str>, data: &str) -> Result<SseEvent, ProviderError> {
        if data == "[DONE]" {
            return Ok(SseEvent::Done);
        }

        let chunk: StreamResponse = serde_json::from_str(data)
            .map_err(|e| ProviderError::MalformedStream(format!("{e}: {data}")))?;

        let usage = chunk.usage.as_ref().map(to_usage);
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(match usage {
                Some(_) => SseEvent::Delta {
                    content: None,
                    thinking: None,
                    tool_calls: Vec::new(),
                    finish_reason: None,
                    usage,
                },
                None => SseEvent::Ignore,
            });
        };

        let tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = tc
                    .function
                    .map(|f| (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()))
                    .unwrap_or_default();
                ToolCallFragment {
                    index: tc.index,
                    id: tc.id.unwrap_or_default(),
                    name,
                    arguments,
                }
            })
            .collect();

        Ok(SseEvent::Delta {
            content: choice.delta.content.filter(|c| !c.is_empty()),
            thinking: choice
                .delta
                .reasoning_content
                .or(choice.delta.reasoning)
                .filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_wire),
            usage,
        })
    }

    fn parse_rate_limits(&self, headers: &HeaderMap) -> RateLimits {
        let now = Utc::now();
        RateLimits {
            remaining_requests: header_u64(headers, "x-ratelimit-remaining-requests"),
            remaining_tokens: header_u64(headers, "x-ratelimit-remaining-tokens"),
            requests_reset_at: header_str(headers, "x-ratelimit-reset-requests")
                .and_then(|v| reset_after(now, v)),
            tokens_reset_at: header_str(headers, "x-ratelimit-reset-tokens")
                .and_then(|v| reset_after(now, v)),
        }
    }
}

// --- OpenAI API types (internal) ---

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
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

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
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
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
