//! Process-wide usage counters. All counters only ever grow.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct UsageStats {
    requests: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
    tool_calls: AtomicU64,
    tool_failures: AtomicU64,
    cancelled_turns: AtomicU64,
}

/// Point-in-time copy of [`UsageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub cancelled_turns: u64,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One LLM request and the tokens it reported.
    pub fn record_request(&self, prompt: u32, completion: u32, total: u32) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(u64::from(prompt), Ordering::Relaxed);
        self.completion_tokens.fetch_add(u64::from(completion), Ordering::Relaxed);
        let total = if total == 0 { prompt.saturating_add(completion) } else { total };
        self.total_tokens.fetch_add(u64::from(total), Ordering::Relaxed);
    }

    pub fn record_tool_call(&self, success: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cancelled_turn(&self) {
        self.cancelled_turns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            cancelled_turns: self.cancelled_turns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = UsageStats::new();
        stats.record_request(10, 5, 15);
        stats.record_request(3, 2, 0);
        stats.record_tool_call(true);
        stats.record_tool_call(false);
        stats.record_cancelled_turn();

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.prompt_tokens, 13);
        assert_eq!(snap.total_tokens, 20);
        assert_eq!((snap.tool_calls, snap.tool_failures), (2, 1));
        assert_eq!(snap.cancelled_turns, 1);
    }
}
