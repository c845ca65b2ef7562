//! Wire dialects: how a particular backend family spells a chat request.
//!
//! The [`LlmClient`](crate::client::LlmClient) owns transport (HTTP, SSE
//! framing, fallback, cancellation); a [`Dialect`] owns everything that
//! differs between backends: endpoint path, auth headers, request body,
//! response body, per-event SSE payloads and rate-limit headers.

use codeclaw_core::error::ProviderError;
use codeclaw_core::provider::{FinishReason, ProviderRequest, ProviderResponse, RateLimits, Usage};
use reqwest::RequestBuilder;
use reqwest::header::HeaderMap;

/// One piece of a streamed tool call.
///
/// `id` is empty on continuation fragments; `index` is the backend's slot
/// number when it provides one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: Option<u32>,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// What one SSE `data:` payload means.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Delta {
        content: Option<String>,
        thinking: Option<String>,
        tool_calls: Vec<ToolCallFragment>,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
    /// End of stream (`[DONE]`, `message_stop`)
    Done,
    /// Keep-alives and event types with no payload for us
    Ignore,
}

impl SseEvent {
    pub fn content(text: impl Into<String>) -> Self {
        SseEvent::Delta {
            content: Some(text.into()),
            thinking: None,
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
        }
    }
}

/// Backend-specific request/response encoding.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Full URL of the chat endpoint under `base_url`.
    fn endpoint(&self, base_url: &str) -> String;

    /// Attach auth and protocol headers.
    fn apply_headers(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder;

    fn build_request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value;

    fn parse_response_body(&self, body: &[u8]) -> Result<ProviderResponse, ProviderError>;

    /// Interpret one SSE data payload. `event` is the preceding `event:` name, if any.
    fn parse_sse_data(&self, event: Option<&str>, data: &str) -> Result<SseEvent, ProviderError>;

    fn parse_rate_limits(&self, headers: &HeaderMap) -> RateLimits;
}

/// Read a header as a trimmed string.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}
