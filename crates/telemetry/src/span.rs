//! Execution spans for tool runs, LLM calls and whole turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest output preview kept on a span.
pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    LlmCall,
    ToolExecution,
    /// User message to final response
    Turn,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmCall => write!(f, "llm_call"),
            Self::ToolExecution => write!(f, "tool_execution"),
            Self::Turn => write!(f, "turn"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: SpanKind,
    /// Tool name, model name or conversation id
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub success: Option<bool>,
    /// Set when the work failed abnormally, e.g. `"panic"`
    pub error_type: Option<String>,
    pub output_preview: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            kind,
            label: label.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_tokens: None,
            output_tokens: None,
            success: None,
            error_type: None,
            output_preview: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Mark the span as ended, computing its duration.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(now.signed_duration_since(self.started_at).num_milliseconds().max(0) as u64);
        self.success = Some(success);
    }

    pub fn record_tokens(&mut self, input: u32, output: u32) {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
    }

    pub fn record_output(&mut self, output: &str) {
        self.output_preview = Some(output.chars().take(PREVIEW_CHARS).collect());
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_sets_duration_and_status() {
        let mut span = Span::new(SpanKind::ToolExecution, "read_file");
        assert!(!span.is_finished());
        span.end(true);
        assert!(span.is_finished());
        assert_eq!(span.success, Some(true));
        assert!(span.duration_ms.is_some());
    }

    #[test]
    fn output_preview_is_truncated() {
        let mut span = Span::new(SpanKind::ToolExecution, "shell");
        span.record_output(&"y".repeat(1000));
        assert_eq!(span.output_preview.unwrap().len(), PREVIEW_CHARS);
    }

    #[test]
    fn kind_display() {
        assert_eq!(SpanKind::LlmCall.to_string(), "llm_call");
        let json = serde_json::to_string(&SpanKind::ToolExecution).unwrap();
        assert_eq!(json, "\"tool_execution\"");
    }
}
