//! Session bookkeeping: has the current system context been sent, how many
//! messages and tokens the session holds.
//!
//! The fingerprint covers the system prompt, the project rules and the
//! project summary. Any change to one of them forces a context refresh on
//! the next turn.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Fingerprint = [u8; 32];

/// Stable content hash of the three context inputs.
///
/// Inputs are normalized (line endings, surrounding whitespace) and
/// length-prefixed so that moving text between fields changes the hash.
pub fn fingerprint(system_prompt: &str, rules: &str, project: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    for part in [system_prompt, rules, project] {
        let normalized = part.replace("\r\n", "\n");
        let normalized = normalized.trim();
        hasher.update((normalized.len() as u64).to_le_bytes());
        hasher.update(normalized.as_bytes());
    }
    hasher.finalize().into()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SessionState {
    fingerprint: Option<Fingerprint>,
    context_sent: bool,
    message_count: usize,
    total_tokens_sent: u64,
    last_prompt_tokens: u32,
    completions: u64,
}

/// Read-only snapshot for status readouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub context_sent: bool,
    pub message_count: usize,
    pub total_tokens_sent: u64,
    pub last_prompt_tokens: u32,
    pub completions: u64,
    /// Hex fingerprint of the last context sent
    pub fingerprint: Option<String>,
}

/// Tracks what the model has already seen in this session.
///
/// Read by status displays while the agent loop writes it, so the lock is
/// its own and never held across an await.
#[derive(Debug, Default)]
pub struct SessionManager {
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn needs_context_refresh(&self, system_prompt: &str, rules: &str, project: &str) -> bool {
        let current = fingerprint(system_prompt, rules, project);
        self.with_state(|s| !s.context_sent || s.fingerprint != Some(current))
    }

    pub fn mark_context_sent(&self, system_prompt: &str, rules: &str, project: &str) {
        let current = fingerprint(system_prompt, rules, project);
        self.with_state(|s| {
            s.fingerprint = Some(current);
            s.context_sent = true;
        });
    }

    /// Account one completed model request.
    pub fn update_token_usage(&self, prompt_tokens: u32) {
        self.with_state(|s| {
            s.total_tokens_sent += u64::from(prompt_tokens);
            s.last_prompt_tokens = prompt_tokens;
            s.completions += 1;
        });
    }

    /// Record the current short-term message count.
    pub fn set_message_count(&self, count: usize) {
        self.with_state(|s| s.message_count = count);
    }

    /// True once the message count exceeds `trigger_messages`.
    pub fn should_compress(&self, trigger_messages: usize) -> bool {
        self.with_state(|s| s.message_count > trigger_messages)
    }

    /// Force the next turn to resend the system context.
    pub fn reset_session(&self) {
        self.with_state(|s| s.context_sent = false);
    }

    pub fn stats(&self) -> ContextStats {
        self.with_state(|s| ContextStats {
            context_sent: s.context_sent,
            message_count: s.message_count,
            total_tokens_sent: s.total_tokens_sent,
            last_prompt_tokens: s.last_prompt_tokens,
            completions: s.completions,
            fingerprint: s.fingerprint.map(|f| f.iter().map(|b| format!("{b:02x}")).collect()),
        })
    }

    #[cfg(test)]
    fn snapshot(&self) -> SessionState {
        self.with_state(|s| s.clone())
    }
}
