//! Bounded in-memory store of finished spans.

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::span::{Span, SpanKind};

const DEFAULT_CAPACITY: usize = 512;

/// Keeps the most recent finished spans; the oldest fall off first.
pub struct TraceRecorder {
    capacity: usize,
    spans: RwLock<VecDeque<Span>>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TraceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            spans: RwLock::new(VecDeque::new()),
        }
    }

    pub fn record(&self, span: Span) {
        tracing::trace!(
            kind = %span.kind,
            label = %span.label,
            duration_ms = ?span.duration_ms,
            success = ?span.success,
            "Span recorded"
        );
        let mut spans = self.spans.write().unwrap_or_else(|e| e.into_inner());
        if spans.len() == self.capacity {
            spans.pop_front();
        }
        spans.push_back(span);
    }

    /// Recorded spans, oldest first.
    pub fn spans(&self) -> Vec<Span> {
        self.spans
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn spans_of(&self, kind: SpanKind) -> Vec<Span> {
        self.spans
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.spans.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_spans_fall_off() {
        let recorder = TraceRecorder::new(2);
        for label in ["a", "b", "c"] {
            recorder.record(Span::new(SpanKind::ToolExecution, label));
        }
        let labels: Vec<_> = recorder.spans().into_iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["b", "c"]);
    }

    #[test]
    fn filter_by_kind() {
        let recorder = TraceRecorder::default();
        recorder.record(Span::new(SpanKind::ToolExecution, "shell"));
        recorder.record(Span::new(SpanKind::LlmCall, "model"));
        assert_eq!(recorder.spans_of(SpanKind::LlmCall).len(), 1);
        assert_eq!(recorder.len(), 2);
    }
}
