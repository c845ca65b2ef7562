//! Tool executor: lookup, argument validation, panic barrier, error
//! enhancement and tracing for a single call.
//!
//! The executor holds no per-call state and may be invoked concurrently.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use codeclaw_core::tool::{ToolCall, ToolRegistry, ToolResult, validate_arguments};
use codeclaw_telemetry::{Span, SpanKind, TraceRecorder};
use futures::FutureExt;
use tracing::{debug, error};

use crate::diagnostics;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    recorder: Arc<TraceRecorder>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_recorder(registry, Arc::new(TraceRecorder::default()))
    }

    pub fn with_recorder(registry: Arc<ToolRegistry>, recorder: Arc<TraceRecorder>) -> Self {
        Self { registry, recorder }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    /// Run one call. Always produces a result; failures are carried in
    /// [`ToolResult::error`].
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let mut span = Span::new(SpanKind::ToolExecution, &call.name)
            .with_metadata("call_id", call.id.clone().into())
            .with_metadata("arguments", call.arguments.clone());

        let Some(tool) = self.registry.get(&call.name) else {
            span.error_type = Some("not_found".into());
            let result = ToolResult::failure(&call.id, format!("tool not found: {}", call.name));
            return self.finish(span, result);
        };

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &call.arguments) {
            span.error_type = Some("validation".into());
            let result = ToolResult::failure(&call.id, format!("invalid arguments: {reason}"))
                .with_data("error_category", "validation");
            return self.finish(span, result);
        }

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        install_panic_capture();
        let outcome = AssertUnwindSafe(tool.execute(call.arguments.clone()))
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(Ok(mut result)) => {
                result.call_id = call.id.clone();
                result
            }
            Ok(Err(e)) => ToolResult::failure(&call.id, e.to_string()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                // The unwind already left the panic site; its stack was kept by the hook.
                let stack = PANIC_STACK
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_else(|| Backtrace::force_capture().to_string());
                error!(tool = %call.name, call_id = %call.id, panic = %message, "Tool panicked");
                span.error_type = Some("panic".into());
                span.metadata.insert("stack".into(), stack.into());
                ToolResult::failure(&call.id, format!("tool panicked: {message}")).with_data("errorType", "panic")
            }
        };

        if !result.success && !result.error.is_empty() && span.error_type.is_none() {
            let (category, enhanced) = diagnostics::enhance(&call.name, &result.error);
            let original = std::mem::replace(&mut result.error, enhanced);
            result = result
                .with_data("original_error", original)
                .with_data("error_category", category.as_str());
        }

        self.finish(span, result)
    }

    fn finish(&self, mut span: Span, result: ToolResult) -> ToolResult {
        span.record_output(if result.success { &result.output } else { &result.error });
        span.end(result.success);
        debug!(
            tool = %span.label,
            call_id = %result.call_id,
            success = result.success,
            duration_ms = ?span.duration_ms,
            "Tool finished"
        );
        self.recorder.record(span);
        result
    }
}

thread_local! {
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chain a panic hook that keeps the panicking thread's backtrace, so a
/// caught tool panic can report where it happened. Installed once.
fn install_panic_capture() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
