//! Scripted providers and tools for exercising the agent without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use codeclaw_core::error::{ProviderError, ToolError};
use codeclaw_core::message::{Message, MessageToolCall};
use codeclaw_core::provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use codeclaw_core::tool::{Tool, ToolResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(ProviderResponse),
    Fail(ProviderError),
    /// Stream `chunks` text pieces, one every `interval`, then finish.
    Stream {
        chunks: Vec<String>,
        interval: Duration,
    },
}

/// Provider that replays a script, one step per request, and records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script made only of complete responses.
    pub fn responses(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(Step::Respond).collect())
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap_or_else(|e| e.into_inner()).push_back(step);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_step(&self, request: ProviderRequest) -> Result<Step, ProviderError> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request);
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        match self.next_step(request)? {
            Step::Respond(response) => Ok(response),
            Step::Fail(e) => Err(e),
            Step::Stream { chunks, interval } => {
                let total = interval * chunks.len() as u32;
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(total) => Ok(text_response(&chunks.concat())),
                }
            }
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        _cancel: &CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        let step = self.next_step(request)?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            match step {
                Step::Respond(response) => {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: Some(response.message.content),
                            tool_calls: response.message.tool_calls,
                            done: true,
                            finish_reason: Some(response.finish_reason),
                            usage: response.usage,
                            ..Default::default()
                        }))
                        .await;
                }
                Step::Fail(e) => {
                    let _ = tx.send(Err(e)).await;
                }
                Step::Stream { chunks, interval } => {
                    for chunk in chunks {
                        tokio::select! {
                            _ = tx.closed() => return,
                            _ = tokio::time::sleep(interval) => {}
                        }
                        let piece = StreamChunk {
                            content: Some(chunk),
                            ..Default::default()
                        };
                        if tx.send(Ok(piece)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Ok(StreamChunk {
                            done: true,
                            finish_reason: Some(FinishReason::Stop),
                            ..Default::default()
                        }))
                        .await;
                }
            }
        });
        Ok(rx)
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
        finish_reason: FinishReason::Stop,
        metadata: serde_json::Map::new(),
    }
}

/// A response cut off by the token limit.
pub fn truncated_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        finish_reason: FinishReason::Length,
        ..text_response(text)
    }
}

pub fn tool_call_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tools("", calls),
        usage: usage(),
        model: "mock-model".into(),
        finish_reason: FinishReason::ToolCalls,
        metadata: serde_json::Map::new(),
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

/// Tool that answers with a fixed output or echoes `text`, optionally after
/// sleeping `ms` milliseconds (taken from the arguments). Counts invocations.
pub struct EchoTool {
    name: String,
    output: Option<String>,
    calls: AtomicUsize,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            output: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_output(name: &str, output: &str) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "path": {"type": "string"},
                "ms": {"type": "integer"}
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = arguments["ms"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let output = match &self.output {
            Some(fixed) => fixed.clone(),
            None => arguments["text"].as_str().unwrap_or_default().to_string(),
        };
        Ok(ToolResult::ok("", output))
    }
}
