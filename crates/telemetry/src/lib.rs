//! Execution tracing and usage counters for codeclaw.
//!
//! Spans cover tool executions, LLM calls and turns; the recorder keeps the
//! most recent ones for inspection, and [`UsageStats`] tracks token and tool
//! totals for the process lifetime.

pub mod recorder;
pub mod span;
pub mod usage;

pub use recorder::TraceRecorder;
pub use span::{Span, SpanKind};
pub use usage::{UsageSnapshot, UsageStats};
