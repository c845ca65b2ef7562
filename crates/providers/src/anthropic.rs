//! Anthropic Messages dialect.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Typed SSE events (`content_block_delta`, `message_delta`, ...)
//! - Extended thinking surfaced as thinking deltas

use codeclaw_core::error::ProviderError;
use codeclaw_core::message::{Message, MessageToolCall, Role};
use codeclaw_core::provider::*;
use reqwest::RequestBuilder;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, SseEvent, ToolCallFragment, header_str};
use crate::ratelimit::{header_u64, reset_at};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Messages API wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicDialect {
    /// Budget tokens for extended thinking; `None` disables it.
    pub thinking_budget: Option<u32>,
}

impl AnthropicDialect {
    pub fn with_extended_thinking(budget_tokens: u32) -> Self {
        Self {
            thinking_budget: Some(budget_tokens),
        }
    }

    /// Split system messages out; Anthropic takes them as a top-level field.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to content blocks. Consecutive tool results are
    /// merged into one user turn so roles keep alternating.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant if msg.tool_calls.is_empty() => result.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }
}

impl Dialect for AnthropicDialect {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn apply_headers(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }

        if let Some(budget) = self.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget
            });
        }

        body
    }

    fn parse_response_body(&self, body: &[u8]) -> Result<ProviderResponse, ProviderError> {
        let resp: AnthropicResponse =
            serde_json::from_slice(body).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        let mut text_content = String::new();
        let mut thinking = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: serde_json::to_string(&input).map_err(|e| {
                            ProviderError::ApiError {
                                status_code: 200,
                                message: format!("Failed to encode tool input: {e}"),
                            }
                        })?,
                    });
                }
                ResponseContentBlock::Thinking { thinking: t } => thinking.push_str(&t),
                ResponseContentBlock::Other => {}
            }
        }

        let mut metadata = serde_json::Map::new();
        if !thinking.is_empty() {
            metadata.insert("thinking".into(), serde_json::Value::String(thinking));
        }

        let finish_reason = resp
            .stop_reason
            .as_deref()
            .map(FinishReason::from_wire)
            .unwrap_or_default();

        Ok(ProviderResponse {
            message: Message::assistant_with_tools(text_content, tool_calls),
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
            finish_reason,
            metadata,
        })
    }

    fn parse_sse_data(&self, event: Option<&str>, data: &str) -> Result<SseEvent, ProviderError> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::MalformedStream(format!("{e}: {data}")))?;
        let event_type = value["type"].as_str().or(event).unwrap_or("");

        let delta = |content: Option<String>, thinking: Option<String>, tool_calls: Vec<ToolCallFragment>| {
            SseEvent::Delta {
                content,
                thinking,
                tool_calls,
                finish_reason: None,
                usage: None,
            }
        };
        let index = value["index"].as_u64().map(|i| i as u32);

        Ok(match event_type {
            "message_start" => {
                let input = value["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
                SseEvent::Delta {
                    content: None,
                    thinking: None,
                    tool_calls: Vec::new(),
                    finish_reason: None,
                    usage: Some(Usage {
                        prompt_tokens: input,
                        completion_tokens: 0,
                        total_tokens: input,
                    }),
                }
            }
            "content_block_start" => {
                let block = &value["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => delta(
                        None,
                        None,
                        vec![ToolCallFragment {
                            index,
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments: String::new(),
                        }],
                    ),
                    Some("text") => match block["text"].as_str().filter(|t| !t.is_empty()) {
                        Some(text) => SseEvent::content(text),
                        None => SseEvent::Ignore,
                    },
                    _ => SseEvent::Ignore,
                }
            }
            "content_block_delta" => {
                let d = &value["delta"];
                match d["type"].as_str().unwrap_or("") {
                    "text_delta" => delta(d["text"].as_str().map(String::from), None, Vec::new()),
                    "thinking_delta" => {
                        delta(None, d["thinking"].as_str().map(String::from), Vec::new())
                    }
                    "input_json_delta" => delta(
                        None,
                        None,
                        vec![ToolCallFragment {
                            index,
                            id: String::new(),
                            name: String::new(),
                            arguments: d["partial_json"].as_str().unwrap_or_default().to_string(),
                        }],
                    ),
                    _ => SseEvent::Ignore,
                }
            }
            "message_delta" => {
                let output = value["usage"]["output_tokens"].as_u64().map(|v| v as u32);
                SseEvent::Delta {
                    content: None,
                    thinking: None,
                    tool_calls: Vec::new(),
                    finish_reason: value["delta"]["stop_reason"].as_str().map(FinishReason::from_wire),
                    usage: output.map(|out| Usage {
                        prompt_tokens: 0,
                        completion_tokens: out,
                        total_tokens: out,
                    }),
                }
            }
            "message_stop" => SseEvent::Done,
            "error" => {
                let message = value["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(ProviderError::StreamInterrupted(message));
            }
            _ => SseEvent::Ignore,
        })
    }

    fn parse_rate_limits(&self, headers: &HeaderMap) -> RateLimits {
        RateLimits {
            remaining_requests: header_u64(headers, "anthropic-ratelimit-requests-remaining"),
            remaining_tokens: header_u64(headers, "anthropic-ratelimit-tokens-remaining"),
            requests_reset_at: header_str(headers, "anthropic-ratelimit-requests-reset")
                .and_then(reset_at),
            tokens_reset_at: header_str(headers, "anthropic-ratelimit-tokens-reset")
                .and_then(reset_at),
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
