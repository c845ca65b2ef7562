//! Approval bridge: a single-slot channel between the agent's sensitive-tool
//! gate and whoever approves (a terminal prompt, a UI button).
//!
//! The agent calls [`ApprovalBridge::request`], which notifies the approver
//! and waits for one boolean. Approvers answer through an
//! [`ApprovalResponder`]; answers that arrive while nothing is waiting are
//! dropped, and sending never blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest argument preview handed to the approver.
pub const PREVIEW_CHARS: usize = 200;

/// What the approver is asked about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub call_id: String,
    /// Truncated rendering of the call arguments
    pub preview: String,
}

impl ApprovalRequest {
    pub fn new(tool_name: impl Into<String>, call_id: impl Into<String>, arguments: &str) -> Self {
        let mut preview: String = arguments.chars().take(PREVIEW_CHARS).collect();
        if arguments.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        Self {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            preview,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
    TimedOut,
    Cancelled,
}

impl ApprovalDecision {
    pub fn is_approved(self) -> bool {
        self == ApprovalDecision::Approved
    }
}

type RequestHandler = Arc<dyn Fn(ApprovalRequest) + Send + Sync>;

struct Shared {
    outstanding: AtomicBool,
    tx: mpsc::Sender<bool>,
}

/// Handle an approver uses to answer.
#[derive(Clone)]
pub struct ApprovalResponder {
    shared: Arc<Shared>,
}

impl ApprovalResponder {
    /// Deliver a decision. Returns `false` when it was dropped because no
    /// request is waiting or an answer is already queued.
    pub fn respond(&self, approved: bool) -> bool {
        if !self.shared.outstanding.load(Ordering::SeqCst) {
            debug!(approved, "Dropping approval with no outstanding request");
            return false;
        }
        self.shared.tx.try_send(approved).is_ok()
    }

    pub fn is_waiting(&self) -> bool {
        self.shared.outstanding.load(Ordering::SeqCst)
    }
}

pub struct ApprovalBridge {
    shared: Arc<Shared>,
    rx: tokio::sync::Mutex<mpsc::Receiver<bool>>,
    handler: Mutex<Option<RequestHandler>>,
}

impl Default for ApprovalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalBridge {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            shared: Arc::new(Shared {
                outstanding: AtomicBool::new(false),
                tx,
            }),
            rx: tokio::sync::Mutex::new(rx),
            handler: Mutex::new(None),
        }
    }

    pub fn responder(&self) -> ApprovalResponder {
        ApprovalResponder {
            shared: self.shared.clone(),
        }
    }

    /// Install the callback that presents requests to the approver. It must
    /// not block.
    pub fn set_request_handler(&self, handler: impl Fn(ApprovalRequest) + Send + Sync + 'static) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    /// Ask for approval and wait up to `timeout`. Timeout and cancellation
    /// both count as a refusal.
    pub async fn request(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let handler = self.handler.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(handler) = handler else {
            warn!(tool = %request.tool_name, "No approver installed, denying");
            return ApprovalDecision::Denied;
        };

        let mut rx = self.rx.lock().await;
        // Discard anything that slipped in between requests.
        while rx.try_recv().is_ok() {}

        let tool = request.tool_name.clone();
        self.shared.outstanding.store(true, Ordering::SeqCst);
        handler(request);

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => ApprovalDecision::Cancelled,
            answer = tokio::time::timeout(timeout, rx.recv()) => match answer {
                Ok(Some(true)) => ApprovalDecision::Approved,
                Ok(Some(false)) | Ok(None) => ApprovalDecision::Denied,
                Err(_) => ApprovalDecision::TimedOut,
            },
        };

        self.shared.outstanding.store(false, Ordering::SeqCst);
        info!(tool = %tool, decision = ?decision, "Approval decided");
        decision
    }
}
