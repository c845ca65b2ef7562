//! Observer hooks. They may be called from any task and must not block.

use std::sync::Arc;

use codeclaw_core::tool::{ToolCall, ToolResult};

pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// `(content, thinking, done)`; `done` is delivered once per turn.
pub type StreamCallback = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

pub type ToolStartCallback = Arc<dyn Fn(&ToolCall) + Send + Sync>;
pub type ToolCompleteCallback = Arc<dyn Fn(&ToolCall, &ToolResult) + Send + Sync>;
pub type ToolErrorCallback = Arc<dyn Fn(&ToolCall, &str) + Send + Sync>;

/// Tool lifecycle hooks.
#[derive(Clone, Default)]
pub struct ToolCallbacks {
    pub on_start: Option<ToolStartCallback>,
    pub on_complete: Option<ToolCompleteCallback>,
    pub on_error: Option<ToolErrorCallback>,
}

impl ToolCallbacks {
    pub(crate) fn started(&self, call: &ToolCall) {
        if let Some(cb) = &self.on_start {
            cb(call);
        }
    }

    /// Successful results go to `on_complete`, failures to `on_error`.
    pub(crate) fn finished(&self, call: &ToolCall, result: &ToolResult) {
        if result.success {
            if let Some(cb) = &self.on_complete {
                cb(call, result);
            }
        } else if let Some(cb) = &self.on_error {
            cb(call, &result.error);
        }
    }
}

impl std::fmt::Debug for ToolCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
