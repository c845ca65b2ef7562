//! Per-tool retry context.
//!
//! Wraps the executor and remembers, per tool name, every failed attempt.
//! Failures come back to the model as a report: what went wrong, how it was
//! classified, how to fix it, and what was already tried. Nothing is retried
//! here; the model decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use codeclaw_core::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::{self, ErrorCategory};
use crate::executor::ToolExecutor;

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub arguments: serde_json::Value,
    pub error: String,
    pub category: ErrorCategory,
    /// A later call to the same tool succeeded
    pub recovered: bool,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRetryState {
    pub attempts: u32,
    pub history: Vec<RetryAttempt>,
    pub last_category: Option<ErrorCategory>,
}

pub struct RetryTracker {
    executor: Arc<ToolExecutor>,
    max_attempts: usize,
    tools: Mutex<HashMap<String, Arc<Mutex<ToolRetryState>>>>,
}

impl RetryTracker {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self::with_max_attempts(executor, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(executor: Arc<ToolExecutor>, max_attempts: usize) -> Self {
        Self {
            executor,
            max_attempts: max_attempts.max(1),
            tools: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    fn state_for(&self, tool: &str) -> Arc<Mutex<ToolRetryState>> {
        self.tools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tool.to_string())
            .or_default()
            .clone()
    }

    /// Snapshot of a tool's retry state.
    pub fn state(&self, tool: &str) -> Option<ToolRetryState> {
        let state = self.tools.lock().unwrap_or_else(|e| e.into_inner()).get(tool).cloned()?;
        let snapshot = state.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Some(snapshot)
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let state = self.state_for(&call.name);
        let attempt = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.attempts += 1;
            state.attempts
        };

        let mut result = self.executor.execute(call).await;

        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        if result.success {
            if let Some(last) = state.history.last_mut()
                && !last.recovered
            {
                last.recovered = true;
                debug!(tool = %call.name, attempt, "Tool recovered after failure");
            }
            return result;
        }
        if result.error.is_empty() {
            return result;
        }

        let original = result
            .data
            .get("original_error")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| result.error.clone());
        let category = diagnostics::classify(&call.name, &original);

        let report = render_report(&call.name, attempt, &original, category, &state.history, self.max_attempts);

        state.history.push(RetryAttempt {
            attempt,
            timestamp: Utc::now(),
            arguments: call.arguments.clone(),
            error: original,
            category,
            recovered: false,
            suggestion: category.suggestions().first().copied().unwrap_or_default().to_string(),
        });
        let excess = state.history.len().saturating_sub(self.max_attempts);
        state.history.drain(..excess);
        state.last_category = Some(category);

        result.error = report;
        result
    }
}

fn render_report(
    tool: &str,
    attempt: u32,
    original: &str,
    category: ErrorCategory,
    prior: &[RetryAttempt],
    max_attempts: usize,
) -> String {
    let mut report = format!("Tool '{tool}' failed (attempt {attempt}).\n\nWhat went wrong:\n{original}\n");
    report.push_str(&format!("\nClassification: {category} ({})\n", category.summary()));
    report.push_str("\nHow to fix:");
    for hint in category.suggestions() {
        report.push_str("\n- ");
        report.push_str(hint);
    }
    report.push('\n');

    let unresolved: Vec<&RetryAttempt> = prior.iter().filter(|a| !a.recovered).collect();
    if !unresolved.is_empty() {
        report.push_str("\nPrevious attempts:");
        for a in &unresolved {
            report.push_str(&format!("\n- #{} at {} ({})", a.attempt, a.timestamp.format("%H:%M:%S"), a.category));
        }
        report.push('\n');
    }
    if unresolved.len() + 1 >= max_attempts {
        report.push_str("\nThis tool keeps failing; try a different approach instead of repeating the call.\n");
    }
    report
}
