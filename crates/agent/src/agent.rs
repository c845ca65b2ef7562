//! The orchestration loop.
//!
//! One [`Agent`] owns the conversation transcript behind a single async
//! mutex. A turn holds that mutex from the user message to the final answer,
//! including every tool round and continuation, so user turns and heartbeat
//! turns never interleave.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use codeclaw_core::error::{Error, ProviderError, Result};
use codeclaw_core::event::{DomainEvent, EventBus};
use codeclaw_core::memory::{MemoryItem, MemoryStats};
use codeclaw_core::message::{Conversation, Message, STATUS_ERROR, STATUS_STOPPED};
use codeclaw_core::project::{ProjectContext, load_rules};
use codeclaw_core::provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, Usage};
use codeclaw_core::tool::ToolRegistry;
use codeclaw_memory::MemoryManager;
use codeclaw_security::{ApprovalBridge, AuditLogger, Permissions, TracingSink};
use codeclaw_telemetry::{Span, SpanKind, TraceRecorder, UsageSnapshot, UsageStats};
use codeclaw_tools::{RetryTracker, ToolExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callbacks::{StatusCallback, StreamCallback, ToolCallbacks};
use crate::compression;
use crate::dispatch::Dispatcher;
use crate::insight::extract_insights;
use crate::prompt::{PromptBuilder, TaskContext};
use crate::session::{ContextStats, SessionManager};
use crate::token;
use crate::turn::TurnState;

/// User turn appended when a response was truncated by length.
pub const CONTINUE_PROMPT: &str = "continue from where you stopped";

const STOPPED_PLACEHOLDER: &str = "[stopped]";
const ERROR_PLACEHOLDER: &str = "[error]";
const PREVIEW_CHARS: usize = 80;

/// Behaviour knobs, built by the binary from its configuration.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Tool rounds allowed per turn
    pub max_tool_depth: u32,
    /// `length` continuations allowed per turn
    pub max_continuations: u32,
    /// Stream responses when an observer is listening
    pub stream: bool,
    pub max_parallel_tools: usize,
    /// Working-memory relevance decay applied at the start of each turn
    pub working_memory_decay: f32,
    pub approval_timeout: Duration,
    /// Short-term message count above which memory is compressed
    pub compression_trigger: usize,
    /// Whole turns kept in the transcript after a compression
    pub keep_recent_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".into(),
            temperature: 0.7,
            top_p: None,
            max_tokens: None,
            max_tool_depth: 50,
            max_continuations: 5,
            stream: true,
            max_parallel_tools: 8,
            working_memory_decay: 0.1,
            approval_timeout: Duration::from_secs(120),
            compression_trigger: 40,
            keep_recent_turns: 4,
        }
    }
}

/// What a successful turn produced.
#[derive(Debug, Default)]
struct TurnOutput {
    answer: String,
    /// Messages to append to the transcript, user message first
    messages: Vec<Message>,
    tool_rounds: u32,
    continuations: u32,
    model: String,
    tokens: u32,
}

pub struct Agent {
    provider: Arc<dyn Provider>,
    settings: AgentSettings,
    registry: Arc<ToolRegistry>,
    tools: Arc<RetryTracker>,
    memory: Arc<MemoryManager>,
    session: SessionManager,
    permissions: Arc<Permissions>,
    approvals: Arc<ApprovalBridge>,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
    usage: Arc<UsageStats>,
    recorder: Arc<TraceRecorder>,
    prompt: PromptBuilder,
    project: Option<Arc<dyn ProjectContext>>,
    rules_file: Option<PathBuf>,

    /// The top-level turn lock. Whoever holds it owns the transcript.
    transcript: tokio::sync::Mutex<Conversation>,
    state: Mutex<TurnState>,
    root: CancellationToken,
    current: Mutex<Option<CancellationToken>>,

    status_callback: RwLock<Option<StatusCallback>>,
    stream_callback: RwLock<Option<StreamCallback>>,
    tool_callbacks: RwLock<ToolCallbacks>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        memory: Arc<MemoryManager>,
        settings: AgentSettings,
    ) -> Self {
        let recorder = Arc::new(TraceRecorder::default());
        let executor = Arc::new(ToolExecutor::with_recorder(registry.clone(), recorder.clone()));
        Self {
            provider,
            settings,
            registry,
            tools: Arc::new(RetryTracker::new(executor)),
            memory,
            session: SessionManager::new(),
            permissions: Arc::new(Permissions::default()),
            approvals: Arc::new(ApprovalBridge::new()),
            audit: Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)])),
            events: Arc::new(EventBus::new(256)),
            usage: Arc::new(UsageStats::new()),
            recorder,
            prompt: PromptBuilder::default(),
            project: None,
            rules_file: None,
            transcript: tokio::sync::Mutex::new(Conversation::new()),
            state: Mutex::new(TurnState::Idle),
            root: CancellationToken::new(),
            current: Mutex::new(None),
            status_callback: RwLock::new(None),
            stream_callback: RwLock::new(None),
            tool_callbacks: RwLock::new(ToolCallbacks::default()),
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalBridge>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Record tool and LLM spans into `recorder` instead of a private one.
    pub fn with_recorder(mut self, recorder: Arc<TraceRecorder>) -> Self {
        let executor = Arc::new(ToolExecutor::with_recorder(self.registry.clone(), recorder.clone()));
        self.tools = Arc::new(RetryTracker::new(executor));
        self.recorder = recorder;
        self
    }

    pub fn with_prompt_builder(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_project(mut self, project: Arc<dyn ProjectContext>) -> Self {
        self.project = Some(project);
        self
    }

    /// Rules are re-read at the start of every turn.
    pub fn with_rules_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_file = Some(path.into());
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn approvals(&self) -> &Arc<ApprovalBridge> {
        &self.approvals
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    // ── Observers ──────────────────────────────────────────────────────

    pub fn set_status_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.status_callback.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Observer for every turn started with [`Agent::chat`].
    pub fn set_stream_callback(&self, callback: impl Fn(&str, &str, bool) + Send + Sync + 'static) {
        *self.stream_callback.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    pub fn set_tool_callbacks(&self, callbacks: ToolCallbacks) {
        *self.tool_callbacks.write().unwrap_or_else(|e| e.into_inner()) = callbacks;
    }

    // ── Turns ──────────────────────────────────────────────────────────

    /// Run one turn and return the final assistant text.
    ///
    /// A stopped turn returns an error for which `is_cancelled()` is true.
    pub async fn chat(&self, text: &str) -> Result<String> {
        let observer = self.stream_callback.read().unwrap_or_else(|e| e.into_inner()).clone();
        self.run_turn(text, observer).await
    }

    /// Like [`Agent::chat`] but streams deltas to `callback`, which sees
    /// `done = true` exactly once when the turn ends.
    pub async fn chat_with_streaming(
        &self,
        text: &str,
        callback: impl Fn(&str, &str, bool) + Send + Sync + 'static,
    ) -> Result<String> {
        self.run_turn(text, Some(Arc::new(callback))).await
    }

    /// Cancel the turn in progress. Returns `false` when nothing is running.
    pub fn stop_current_request(&self) -> bool {
        match self.current.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(token) => {
                info!("Stopping current request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a turn currently holds the turn lock.
    pub fn is_busy(&self) -> bool {
        self.transcript.try_lock().is_err()
    }

    pub fn turn_state(&self) -> TurnState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the transcript. Waits for any running turn.
    pub async fn transcript(&self) -> Conversation {
        self.transcript.lock().await.clone()
    }

    pub fn context_stats(&self) -> ContextStats {
        self.session.stats()
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.memory.stats().await
    }

    pub fn usage_stats(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    /// Token cancelled by [`Agent::shutdown`]. Background tasks tied to the
    /// agent's lifetime should stop when it fires.
    pub fn lifetime(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancel everything, wait for the running turn to unwind and flush
    /// long-term memory. Later turns fail as cancelled.
    pub async fn shutdown(&self) {
        info!("Agent shutting down");
        self.root.cancel();
        let _turn = self.transcript.lock().await;
        self.persist_memory().await;
    }

    async fn run_turn(&self, text: &str, stream: Option<StreamCallback>) -> Result<String> {
        let outcome = self.run_turn_locked(text, stream.as_ref()).await;
        if let Some(cb) = &stream {
            cb("", "", true);
        }
        outcome
    }

    async fn run_turn_locked(&self, text: &str, stream: Option<&StreamCallback>) -> Result<String> {
        let mut transcript = self.transcript.lock().await;
        if self.root.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let cancel = self.root.child_token();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());

        self.memory.add_message("user", text).await;
        // Files read by earlier turns fade; this turn's reads start fresh.
        self.memory
            .age_working_memory(self.settings.working_memory_decay)
            .await;
        let conversation_id = transcript.id.to_string();
        self.events.publish(DomainEvent::TurnStarted {
            conversation_id: conversation_id.clone(),
            input_preview: text.chars().take(PREVIEW_CHARS).collect(),
            timestamp: Utc::now(),
        });
        debug!(conversation_id = %conversation_id, "Turn started");

        let partial = Mutex::new(String::new());
        let outcome = self.drive(&mut transcript, text, &cancel, stream, &partial).await;

        let result = match outcome {
            // Still stoppable while committing: a slow summary gives way.
            Ok(output) => self.commit_turn(&mut transcript, output, &cancel).await,
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                self.transition(TurnState::Cancelled);
                self.usage.record_cancelled_turn();
                let partial = std::mem::take(&mut *partial.lock().unwrap_or_else(|e| e.into_inner()));
                let content = if partial.is_empty() {
                    STOPPED_PLACEHOLDER.to_string()
                } else {
                    partial
                };
                transcript.push(Message::user(text));
                transcript.push(Message::placeholder(content, STATUS_STOPPED));
                self.events.publish(DomainEvent::TurnCancelled {
                    conversation_id,
                    timestamp: Utc::now(),
                });
                info!("Turn cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!(error = %e, "Turn failed");
                transcript.push(Message::user(text));
                transcript.push(Message::placeholder(ERROR_PLACEHOLDER, STATUS_ERROR));
                self.events.publish(DomainEvent::TurnFailed {
                    conversation_id,
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        };

        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.transition(TurnState::Idle);
        result
    }

    /// The turn state machine. Returns the messages to commit on success.
    async fn drive(
        &self,
        transcript: &mut Conversation,
        text: &str,
        cancel: &CancellationToken,
        stream: Option<&StreamCallback>,
        partial: &Mutex<String>,
    ) -> Result<TurnOutput> {
        self.transition(TurnState::Building);
        self.refresh_context(transcript, text).await;

        let definitions = self.registry.definitions();
        let hooks = self.tool_callbacks.read().unwrap_or_else(|e| e.into_inner()).clone();
        let dispatcher = self.dispatcher();
        let mut out = TurnOutput::default();
        let mut scratch = vec![Message::user(text)];

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.transition(TurnState::Calling);

            let mut request = ProviderRequest::new(
                &self.settings.model,
                transcript.messages.iter().chain(scratch.iter()).cloned().collect(),
            );
            request.temperature = self.settings.temperature;
            request.top_p = self.settings.top_p;
            request.max_tokens = self.settings.max_tokens;
            request.tools = definitions.clone();

            let response = self.call_model(request, cancel, stream, partial).await?;
            out.model = response.model.clone();
            out.tokens += response.usage.map(|u| u.total_tokens).unwrap_or_default();

            let ProviderResponse {
                message,
                finish_reason,
                usage,
                ..
            } = response;

            if !message.tool_calls.is_empty() {
                if out.tool_rounds >= self.settings.max_tool_depth {
                    warn!(depth = out.tool_rounds, "Maximum tool depth reached");
                    return Err(Error::MaxToolDepth {
                        depth: self.settings.max_tool_depth,
                    });
                }
                out.tool_rounds += 1;
                self.transition(TurnState::ToolDispatch);
                debug!(
                    depth = out.tool_rounds,
                    calls = message.tool_calls.len(),
                    "Dispatching tool round"
                );

                let calls = message.tool_calls.clone();
                let results = dispatcher.dispatch(&calls, cancel, &hooks).await;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                scratch.push(message);
                scratch.extend(
                    calls
                        .iter()
                        .zip(results)
                        .map(|(call, result)| Message::tool_result(&call.id, result.to_message_content())),
                );
                partial.lock().unwrap_or_else(|e| e.into_inner()).clear();
                continue;
            }

            out.answer.push_str(&message.content);
            let mut reply = Message::assistant(message.content);
            reply.usage = usage;
            scratch.push(reply);

            if finish_reason == FinishReason::Length {
                if out.continuations >= self.settings.max_continuations {
                    warn!(
                        continuations = out.continuations,
                        "Response still truncated, returning partial content"
                    );
                    break;
                }
                out.continuations += 1;
                self.transition(TurnState::Continuation);
                debug!(continuation = out.continuations, "Response truncated, continuing");
                scratch.push(Message::continuation(CONTINUE_PROMPT));
                continue;
            }
            break;
        }

        out.messages = scratch;
        Ok(out)
    }

    /// Install a fresh system prompt when the context fingerprint changed
    /// or the session was reset.
    async fn refresh_context(&self, transcript: &mut Conversation, text: &str) {
        let task = TaskContext::detect(text);
        let base = self.prompt.base(task, &self.registry.list());

        let project = self.project.clone();
        let rules_file = self.rules_file.clone();
        let (project, rules) = tokio::task::spawn_blocking(move || {
            let project = project.map(|p| p.summary().render()).unwrap_or_default();
            let rules = rules_file.map(|f| load_rules(&f)).unwrap_or_default();
            (project, rules)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Project context scan failed");
            (String::new(), String::new())
        });

        if !self.session.needs_context_refresh(&base, &rules, &project) {
            return;
        }
        let history = self.memory.context_digest().await;
        let prompt = self.prompt.compose(&base, &project, &history, &rules);
        transcript.set_system_prompt(&prompt);
        self.session.mark_context_sent(&base, &rules, &project);
        debug!(task = %task, chars = prompt.len(), "System context refreshed");
    }

    async fn call_model(
        &self,
        mut request: ProviderRequest,
        cancel: &CancellationToken,
        stream: Option<&StreamCallback>,
        partial: &Mutex<String>,
    ) -> Result<ProviderResponse> {
        let estimated = token::estimate_request_tokens(&request.messages, &request.tools);
        let mut span = Span::new(SpanKind::LlmCall, &request.model);
        let streaming = AtomicBool::new(false);

        let outcome = match stream {
            Some(cb) if self.settings.stream => {
                request.stream = true;
                partial.lock().unwrap_or_else(|e| e.into_inner()).clear();
                let on_delta = |content: &str, thinking: &str, done: bool| {
                    // the turn reports `done` itself, once
                    if done {
                        return;
                    }
                    if !streaming.swap(true, Ordering::SeqCst) {
                        self.transition(TurnState::Streaming);
                    }
                    partial.lock().unwrap_or_else(|e| e.into_inner()).push_str(content);
                    cb(content, thinking, false);
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    r = self.provider.stream_with_callback(request, cancel, &on_delta) => r,
                }
            }
            _ => {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    r = self.provider.complete(request, cancel) => r,
                };
                if let (Some(cb), Ok(response)) = (stream, &outcome)
                    && !response.message.content.is_empty()
                {
                    cb(&response.message.content, "", false);
                }
                outcome
            }
        };

        match outcome {
            Ok(response) => {
                let usage = response.usage.unwrap_or_else(|| {
                    let completion = token::estimate_tokens(&response.message.content) as u32;
                    Usage {
                        prompt_tokens: estimated,
                        completion_tokens: completion,
                        total_tokens: estimated + completion,
                    }
                });
                self.usage
                    .record_request(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens);
                self.session.update_token_usage(usage.prompt_tokens);
                span.record_tokens(usage.prompt_tokens, usage.completion_tokens);
                span.record_output(&response.message.content);
                span.end(true);
                self.recorder.record(span);
                Ok(response)
            }
            Err(e) => {
                span.error_type = Some(if e.is_cancelled() { "cancelled" } else { "provider" }.into());
                span.end(false);
                self.recorder.record(span);
                Err(e.into())
            }
        }
    }

    /// Commit a successful turn: transcript, memory, insights, compression.
    async fn commit_turn(
        &self,
        transcript: &mut Conversation,
        output: TurnOutput,
        cancel: &CancellationToken,
    ) -> Result<String> {
        transcript.extend(output.messages);
        self.memory.add_message("assistant", &output.answer).await;

        let insights = extract_insights(&output.answer);
        for insight in &insights {
            self.memory
                .add_decision(&insight.text, vec![insight.tag.to_string()])
                .await;
        }
        if !insights.is_empty() {
            debug!(count = insights.len(), "Recorded insights");
        }

        let compressed = self.maybe_compress(transcript, cancel).await;
        if compressed || !insights.is_empty() {
            self.persist_memory().await;
        }

        self.events.publish(DomainEvent::TurnCompleted {
            conversation_id: transcript.id.to_string(),
            model: output.model,
            tool_rounds: output.tool_rounds,
            continuations: output.continuations,
            tokens_used: output.tokens,
            timestamp: Utc::now(),
        });
        info!(
            tool_rounds = output.tool_rounds,
            continuations = output.continuations,
            "Turn completed"
        );
        Ok(output.answer)
    }

    /// Fold old short-term messages into one long-term summary once the
    /// message count passes the trigger.
    async fn maybe_compress(&self, transcript: &mut Conversation, cancel: &CancellationToken) -> bool {
        self.session.set_message_count(self.memory.short_term_len().await);
        if !self.session.should_compress(self.settings.compression_trigger) {
            return false;
        }
        let items = self.memory.items_to_compress().await;
        if items.is_empty() {
            return false;
        }

        let summary = self.summarize(&items, cancel).await;
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let removed = self.memory.compress_items(&ids, &summary).await;
        let dropped = transcript.retain_recent_turns(self.settings.keep_recent_turns);
        self.session.reset_session();
        self.session.set_message_count(self.memory.short_term_len().await);

        self.events.publish(DomainEvent::ContextCompressed {
            items: removed,
            summary_chars: summary.chars().count(),
            timestamp: Utc::now(),
        });
        info!(items = removed, transcript_dropped = dropped, "Context compressed");
        true
    }

    async fn summarize(&self, items: &[MemoryItem], cancel: &CancellationToken) -> String {
        let mut request = ProviderRequest::new(
            &self.settings.model,
            vec![
                Message::system(compression::SUMMARY_SYSTEM_PROMPT),
                Message::user(compression::summary_request(items)),
            ],
        );
        request.temperature = 0.2;

        match self.provider.complete(request, cancel).await {
            Ok(response) if !response.message.content.trim().is_empty() => {
                if let Some(u) = response.usage {
                    self.usage
                        .record_request(u.prompt_tokens, u.completion_tokens, u.total_tokens);
                }
                response.message.content.trim().to_string()
            }
            Ok(_) => compression::extractive_summary(items),
            Err(e) => {
                warn!(error = %e, "Summary request failed, using extractive summary");
                compression::extractive_summary(items)
            }
        }
    }

    async fn persist_memory(&self) {
        if let Err(e) = self.memory.save().await {
            warn!(error = %e, "Failed to persist long-term memory");
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tools: self.tools.clone(),
            permissions: self.permissions.clone(),
            approvals: self.approvals.clone(),
            audit: self.audit.clone(),
            memory: self.memory.clone(),
            events: self.events.clone(),
            usage: self.usage.clone(),
            approval_timeout: self.settings.approval_timeout,
            max_parallel: self.settings.max_parallel_tools,
        }
    }

    fn transition(&self, next: TurnState) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == next {
                return;
            }
            if !state.can_transition(next) {
                warn!(from = ?*state, to = ?next, "Unexpected turn transition");
            }
            *state = next;
        }
        let callback = self.status_callback.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(cb) = callback {
            cb(next.label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use codeclaw_core::message::Role;
    use codeclaw_memory::{InMemoryStore, MemorySettings};
    use serde_json::json;

    fn memory() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::new(
            MemorySettings::default(),
            Arc::new(InMemoryStore::new()),
        ))
    }

    fn agent_with(provider: Arc<ScriptedProvider>, settings: AgentSettings) -> Agent {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("echo"))).unwrap();
        Agent::new(provider, Arc::new(registry), memory(), settings)
    }

    #[tokio::test]
    async fn fifty_tool_rounds_allowed_fifty_first_fails() {
        let mut steps: Vec<ProviderResponse> = (0..51)
            .map(|i| tool_call_response(vec![tool_call(&format!("c{i}"), "echo", json!({"text": "x"}))]))
            .collect();
        steps.push(text_response("never reached"));
        let provider = Arc::new(ScriptedProvider::responses(steps));
        let agent = agent_with(provider.clone(), AgentSettings::default());

        let err = agent.chat("loop forever").await.unwrap_err();
        assert!(matches!(err, Error::MaxToolDepth { depth: 50 }));
        assert!(err.to_string().contains("Maximum tool execution depth"));
        assert_eq!(provider.call_count(), 51);
    }

    #[tokio::test]
    async fn exactly_fifty_rounds_succeed() {
        let mut steps: Vec<ProviderResponse> = (0..50)
            .map(|i| tool_call_response(vec![tool_call(&format!("c{i}"), "echo", json!({"text": "x"}))]))
            .collect();
        steps.push(text_response("done"));
        let provider = Arc::new(ScriptedProvider::responses(steps));
        let agent = agent_with(provider, AgentSettings::default());
        assert_eq!(agent.chat("go").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn continuation_cap_returns_partial() {
        let steps = (0..6).map(|i| truncated_response(&format!("p{i}"))).collect();
        let provider = Arc::new(ScriptedProvider::responses(steps));
        let agent = agent_with(provider.clone(), AgentSettings::default());

        let answer = agent.chat("write a lot").await.unwrap();
        assert_eq!(answer, "p0p1p2p3p4p5");
        // the first request plus five continuations
        assert_eq!(provider.call_count(), 6);
        let last = provider.requests().pop().unwrap();
        assert_eq!(last.messages.last().unwrap().content, CONTINUE_PROMPT);
    }

    #[tokio::test]
    async fn system_prompt_is_not_rebuilt_when_context_is_unchanged() {
        let provider = Arc::new(ScriptedProvider::responses(vec![
            text_response("one"),
            text_response("two"),
        ]));
        let agent = agent_with(provider.clone(), AgentSettings::default());
        agent.chat("hi").await.unwrap();
        let first = agent.context_stats();
        agent.chat("hi again").await.unwrap();
        let second = agent.context_stats();

        assert!(first.context_sent);
        assert_eq!(first.fingerprint, second.fingerprint);
        let transcript = agent.transcript().await;
        assert_eq!(transcript.messages[0].role, Role::System);
        assert_eq!(transcript.messages.len(), 5);
        assert_eq!(second.completions, 2);
    }

    #[tokio::test]
    async fn insights_land_in_long_term_memory() {
        let provider = Arc::new(ScriptedProvider::responses(vec![text_response(
            "Done.\nDecision: use tokio for the server",
        )]));
        let agent = agent_with(provider, AgentSettings::default());
        agent.chat("set up the server").await.unwrap();

        let long_term = agent.memory().long_term_items().await;
        assert_eq!(long_term.len(), 1);
        assert_eq!(long_term[0].content, "use tokio for the server");
        assert_eq!(long_term[0].tags, vec!["decision"]);
    }

    #[tokio::test]
    async fn compression_falls_back_to_extractive_summary() {
        // Turn replies, then a failing summary request.
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Respond(text_response("a1")),
            Step::Respond(text_response("a2")),
            Step::Fail(ProviderError::Network("offline".into())),
        ]));
        let settings = AgentSettings {
            compression_trigger: 3,
            keep_recent_turns: 1,
            ..Default::default()
        };
        let registry = Arc::new(ToolRegistry::new());
        let memory = Arc::new(MemoryManager::new(
            MemorySettings {
                compression_trigger: 3,
                keep_recent: 1,
                ..Default::default()
            },
            Arc::new(InMemoryStore::new()),
        ));
        let agent = Agent::new(provider, registry, memory, settings);
        let mut events = agent.events().subscribe();

        agent.chat("q1").await.unwrap();
        assert_eq!(agent.memory_stats().await.compressions, 0);
        agent.chat("q2").await.unwrap();

        let stats = agent.memory_stats().await;
        assert_eq!(stats.compressions, 1);
        assert_eq!(stats.short_term, 1);
        let summary = &agent.memory().long_term_items().await[0];
        assert!(summary.content.starts_with("Earlier conversation (3 messages)"));
        // the next turn must resend the system context
        assert!(!agent.context_stats().context_sent);

        let transcript = agent.transcript().await;
        let users = transcript.messages.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(users, 1);

        let mut saw_compression = false;
        while let Ok(event) = events.try_recv() {
            if matches!(*event, DomainEvent::ContextCompressed { items: 3, .. }) {
                saw_compression = true;
            }
        }
        assert!(saw_compression);
    }

    #[tokio::test]
    async fn stopping_during_compression_falls_back_to_extractive_summary() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Respond(text_response("a1")),
            Step::Respond(text_response("a2")),
            Step::Stream {
                chunks: vec!["never arrives".into()],
                interval: Duration::from_secs(3600),
            },
        ]));
        let settings = AgentSettings {
            compression_trigger: 3,
            keep_recent_turns: 1,
            ..Default::default()
        };
        let memory = Arc::new(MemoryManager::new(
            MemorySettings {
                compression_trigger: 3,
                keep_recent: 1,
                ..Default::default()
            },
            Arc::new(InMemoryStore::new()),
        ));
        let agent = Arc::new(Agent::new(
            provider.clone(),
            Arc::new(ToolRegistry::new()),
            memory,
            settings,
        ));

        agent.chat("q1").await.unwrap();
        let turn = tokio::spawn({
            let agent = agent.clone();
            async move { agent.chat("q2").await }
        });
        while provider.call_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(agent.stop_current_request());

        let answer = tokio::time::timeout(Duration::from_secs(5), turn)
            .await
            .expect("summary request ignored the stop")
            .unwrap();
        assert_eq!(answer.unwrap(), "a2");
        let summary = &agent.memory().long_term_items().await[0];
        assert!(summary.content.starts_with("Earlier conversation (3 messages)"));
        assert!(!agent.stop_current_request());
    }

    #[tokio::test]
    async fn provider_error_marks_placeholder() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let agent = agent_with(provider, AgentSettings::default());
        let err = agent.chat("hi").await.unwrap_err();
        assert!(!err.is_cancelled());

        let transcript = agent.transcript().await;
        let last = transcript.messages.last().unwrap();
        assert_eq!(last.status(), Some(STATUS_ERROR));
        // only the user message reached memory
        assert_eq!(agent.memory().short_term_len().await, 1);
        assert_eq!(agent.turn_state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn stop_without_turn_is_a_noop() {
        let agent = agent_with(Arc::new(ScriptedProvider::default()), AgentSettings::default());
        assert!(!agent.stop_current_request());
        assert!(!agent.is_busy());
    }

    #[tokio::test]
    async fn turns_after_shutdown_are_cancelled() {
        let agent = agent_with(
            Arc::new(ScriptedProvider::responses(vec![text_response("x")])),
            AgentSettings::default(),
        );
        agent.shutdown().await;
        assert!(agent.chat("hi").await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn status_callback_sees_transitions() {
        let provider = Arc::new(ScriptedProvider::responses(vec![text_response("hello")]));
        let agent = agent_with(provider, AgentSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        agent.set_status_callback(move |s| sink.lock().unwrap().push(s.to_string()));

        agent.chat("hi").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["preparing context", "thinking", "ready"]
        );
    }

    #[tokio::test]
    async fn turns_are_serialized() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Stream {
                chunks: vec!["a".into(), "b".into()],
                interval: Duration::from_millis(30),
            },
            Step::Respond(text_response("second")),
        ]));
        let agent = Arc::new(agent_with(provider, AgentSettings::default()));

        let first = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.chat_with_streaming("one", |_, _, _| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(agent.is_busy());
        let second = agent.chat("two").await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "ab");
        assert_eq!(second, "second");

        let transcript = agent.transcript().await;
        let contents: Vec<&str> = transcript
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "ab", "two", "second"]);
    }
}
