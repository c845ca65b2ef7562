//! Tool dispatch for one assistant message.
//!
//! Calls are parsed, gated against the command deny list, then split:
//! non-sensitive calls run concurrently (bounded), sensitive calls run one
//! at a time behind an approval round-trip. Results come back in the order
//! of the assistant's calls no matter how execution interleaved.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use codeclaw_core::event::{DomainEvent, EventBus};
use codeclaw_core::message::MessageToolCall;
use codeclaw_core::tool::{ToolCall, ToolResult};
use codeclaw_memory::MemoryManager;
use codeclaw_security::{
    ApprovalBridge, ApprovalRequest, AuditEvent, AuditLogger, AuditOutcome, Permissions,
};
use codeclaw_telemetry::UsageStats;
use codeclaw_tools::RetryTracker;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callbacks::ToolCallbacks;

/// Tools whose successful output is a file body worth keeping in working memory.
const FILE_READ_TOOLS: &[&str] = &["read_file", "view_file", "cat_file"];

/// Relevance given to a file that was just read.
pub const READ_FILE_RELEVANCE: f32 = 1.0;

pub const DENIED: &str = "denied";

/// Everything a dispatch needs. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) tools: Arc<RetryTracker>,
    pub(crate) permissions: Arc<Permissions>,
    pub(crate) approvals: Arc<ApprovalBridge>,
    pub(crate) audit: Arc<AuditLogger>,
    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) usage: Arc<UsageStats>,
    pub(crate) approval_timeout: Duration,
    pub(crate) max_parallel: usize,
}

impl Dispatcher {
    /// Execute every call and return one result per call, in call order.
    pub async fn dispatch(
        &self,
        calls: &[MessageToolCall],
        cancel: &CancellationToken,
        hooks: &ToolCallbacks,
    ) -> Vec<ToolResult> {
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut parallel = Vec::new();
        let mut sequential = Vec::new();

        for (index, raw) in calls.iter().enumerate() {
            let call = match parse_call(raw) {
                Ok(call) => call,
                Err(result) => {
                    warn!(tool = %raw.name, call_id = %raw.id, "Malformed tool arguments");
                    let call = ToolCall {
                        id: raw.id.clone(),
                        name: raw.name.clone(),
                        arguments: serde_json::Value::String(raw.arguments.clone()),
                    };
                    hooks.started(&call);
                    hooks.finished(&call, &result);
                    slots[index] = Some(result);
                    continue;
                }
            };

            if let Some(result) = self.command_gate(&call) {
                hooks.started(&call);
                hooks.finished(&call, &result);
                slots[index] = Some(result);
                continue;
            }

            if self.permissions.requires_approval(&call.name) {
                sequential.push((index, call));
            } else {
                parallel.push((index, call));
            }
        }

        debug!(
            parallel = parallel.len(),
            sequential = sequential.len(),
            "Dispatching tool calls"
        );

        if !parallel.is_empty() {
            let limit = self.max_parallel.max(1);
            let tasks: Vec<_> = parallel
                .iter()
                .map(|(index, call)| async move { (*index, self.run(call, hooks).await) })
                .collect();
            let run_all = futures::stream::iter(tasks)
                .buffer_unordered(limit)
                .collect::<Vec<_>>();

            let finished = tokio::select! {
                biased;
                _ = cancel.cancelled() => Vec::new(),
                finished = run_all => finished,
            };
            for (index, result) in finished {
                slots[index] = Some(result);
            }
        }

        for (index, call) in &sequential {
            if cancel.is_cancelled() {
                break;
            }
            slots[*index] = Some(self.run_sensitive(call, cancel, hooks).await);
        }

        calls
            .iter()
            .zip(slots)
            .map(|(raw, slot)| slot.unwrap_or_else(|| ToolResult::failure(&raw.id, "cancelled")))
            .collect()
    }

    fn command_gate(&self, call: &ToolCall) -> Option<ToolResult> {
        let command = call.arguments.get("command")?.as_str()?;
        let pattern = self.permissions.denied_by(command)?.to_string();
        warn!(tool = %call.name, pattern = %pattern, "Command blocked by policy");
        self.audit.log(
            AuditEvent::CommandBlocked {
                pattern: pattern.clone(),
            },
            &call.name,
            AuditOutcome::Denied,
            Some(command.to_string()),
        );
        Some(
            ToolResult::failure(&call.id, format!("blocked by policy: command matches '{pattern}'"))
                .with_data("error_category", "security_violation"),
        )
    }

    async fn run_sensitive(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
        hooks: &ToolCallbacks,
    ) -> ToolResult {
        if !self.permissions.auto_approve() {
            self.audit.log(
                AuditEvent::ApprovalRequested {
                    call_id: call.id.clone(),
                },
                &call.name,
                AuditOutcome::Pending,
                None,
            );

            let request = ApprovalRequest::new(&call.name, &call.id, &call.arguments.to_string());
            let decision = self
                .approvals
                .request(request, self.approval_timeout, cancel)
                .await;
            let approved = decision.is_approved();

            self.audit.log(
                AuditEvent::ApprovalDecided {
                    call_id: call.id.clone(),
                },
                &call.name,
                if approved {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Denied
                },
                Some(format!("{decision:?}")),
            );
            self.events.publish(DomainEvent::ApprovalDecided {
                tool_name: call.name.clone(),
                approved,
                timestamp: Utc::now(),
            });

            if !approved {
                info!(tool = %call.name, call_id = %call.id, decision = ?decision, "Tool call not approved");
                let result = ToolResult::failure(&call.id, DENIED)
                    .with_data("approval", serde_json::to_value(decision).unwrap_or_default());
                hooks.started(call);
                hooks.finished(call, &result);
                return result;
            }
        }

        let result = self.run(call, hooks).await;
        self.audit.log(
            AuditEvent::SensitiveExecution {
                call_id: call.id.clone(),
            },
            &call.name,
            if result.success {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            },
            None,
        );
        result
    }

    async fn run(&self, call: &ToolCall, hooks: &ToolCallbacks) -> ToolResult {
        hooks.started(call);
        let started = Instant::now();
        let result = self.tools.execute(call).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.usage.record_tool_call(result.success);
        self.events.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            success: result.success,
            duration_ms,
            timestamp: Utc::now(),
        });

        if result.success
            && FILE_READ_TOOLS.contains(&call.name.as_str())
            && let Some(path) = call.arguments.get("path").and_then(|p| p.as_str())
        {
            self.memory
                .add_file(path, &result.output, READ_FILE_RELEVANCE)
                .await;
        }

        hooks.finished(call, &result);
        result
    }
}

/// Decode the argument string. An empty string means no arguments.
fn parse_call(raw: &MessageToolCall) -> Result<ToolCall, ToolResult> {
    let arguments = if raw.arguments.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&raw.arguments).map_err(|e| {
            ToolResult::failure(&raw.id, format!("malformed arguments: {e}"))
                .with_data("error_category", "validation")
        })?
    };
    Ok(ToolCall {
        id: raw.id.clone(),
        name: raw.name.clone(),
        arguments,
    })
}
