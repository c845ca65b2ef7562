//! Summaries for short-term memory compression.
//!
//! The agent first asks the model for a summary; [`extractive_summary`] is
//! the fallback when that request fails.

use codeclaw_core::memory::MemoryItem;

/// Per-item excerpt length in the extractive summary.
const EXCERPT_CHARS: usize = 160;
/// Items quoted before the rest are only counted.
const MAX_EXCERPTS: usize = 24;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You compress conversation history for a coding assistant. \
Write a concise summary that keeps decisions, file paths, commands, errors and open tasks. \
Do not add anything that is not in the transcript.";

/// Transcript handed to the model for summarizing.
pub fn summary_request(items: &[MemoryItem]) -> String {
    let mut out = String::from("Summarize this conversation excerpt:\n\n");
    for item in items {
        out.push_str(&format!("[{}] {}\n", item.role, item.content.trim()));
    }
    out
}

/// Deterministic summary: one truncated line per item.
pub fn extractive_summary(items: &[MemoryItem]) -> String {
    let mut out = format!("Earlier conversation ({} messages):\n", items.len());
    for item in items.iter().take(MAX_EXCERPTS) {
        let line = item.content.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        let mut excerpt: String = line.chars().take(EXCERPT_CHARS).collect();
        if line.chars().count() > EXCERPT_CHARS {
            excerpt.push('…');
        }
        out.push_str(&format!("- {}: {}\n", item.role, excerpt));
    }
    if items.len() > MAX_EXCERPTS {
        out.push_str(&format!("- ({} more)\n", items.len() - MAX_EXCERPTS));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeclaw_core::memory::MemoryTier;

    fn item(role: &str, content: &str) -> MemoryItem {
        MemoryItem::new(MemoryTier::Short, role, content)
    }

    #[test]
    fn extractive_summary_quotes_first_lines() {
        let items = vec![item("user", "\nread main.rs\nplease"), item("assistant", "done")];
        assert_eq!(
            extractive_summary(&items),
            "Earlier conversation (2 messages):\n- user: read main.rs\n- assistant: done\n"
        );
    }

    #[test]
    fn long_lines_are_truncated() {
        let items = vec![item("user", &"x".repeat(500))];
        let summary = extractive_summary(&items);
        assert!(summary.contains(&format!("{}…", "x".repeat(EXCERPT_CHARS))));
    }

    #[test]
    fn request_lists_roles() {
        let text = summary_request(&[item("user", "hi"), item("assistant", "hello")]);
        assert!(text.ends_with("[user] hi\n[assistant] hello\n"));
    }
}
