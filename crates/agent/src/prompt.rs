//! System prompt composition.
//!
//! The prompt is assembled from labelled sections: identity and task
//! guidance, the tool catalog grouped by category, the project summary,
//! the long-term history digest and the project rules. Empty sections are
//! omitted. Output depends only on the inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use codeclaw_core::tool::Tool;
use serde::{Deserialize, Serialize};

const DEFAULT_IDENTITY: &str = "You are codeclaw, a coding assistant working inside the user's project. \
Use the available tools to inspect and change files and to run commands. \
Prefer small, verifiable steps and report what you changed.";

/// What kind of work the user is asking for, detected from their message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskContext {
    Debugging,
    Testing,
    Refactoring,
    CodeGeneration,
    Analysis,
    General,
}

/// Keyword table, checked in order. The first context with a hit wins.
const KEYWORDS: &[(TaskContext, &[&str])] = &[
    (
        TaskContext::Debugging,
        &["bug", "fix", "error", "crash", "panic", "broken", "failing", "fails", "debug", "exception", "stack trace"],
    ),
    (TaskContext::Testing, &["test", "tests", "coverage", "assert", "unit test"]),
    (
        TaskContext::Refactoring,
        &["refactor", "rename", "simplify", "extract", "clean up", "cleanup", "restructure"],
    ),
    (
        TaskContext::CodeGeneration,
        &["implement", "create", "add", "write", "build", "generate", "scaffold", "new"],
    ),
    (
        TaskContext::Analysis,
        &["explain", "why", "review", "analyze", "analyse", "understand", "how does", "what does", "summarize"],
    ),
];

impl TaskContext {
    /// Classify a user message by keyword.
    pub fn detect(message: &str) -> Self {
        let lower = message.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();

        for (context, keywords) in KEYWORDS {
            let hit = keywords.iter().any(|k| {
                if k.contains(' ') {
                    lower.contains(k)
                } else {
                    words.contains(k)
                }
            });
            if hit {
                return *context;
            }
        }
        TaskContext::General
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debugging => "debugging",
            Self::Testing => "testing",
            Self::Refactoring => "refactoring",
            Self::CodeGeneration => "code_generation",
            Self::Analysis => "analysis",
            Self::General => "general",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            Self::Debugging => {
                "Reproduce the failure first, read the relevant code, then make the smallest fix and verify it."
            }
            Self::Testing => "Follow the project's existing test layout and run the tests you add.",
            Self::Refactoring => "Preserve behaviour. Change structure in small steps and keep the build green.",
            Self::CodeGeneration => {
                "Match the surrounding code style. Read neighbouring files before writing new ones."
            }
            Self::Analysis => "Answer from the code. Read before you explain and cite file paths.",
            Self::General => "Be concise and concrete.",
        }
    }
}

impl std::fmt::Display for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds system prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    identity: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY)
    }
}

impl PromptBuilder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    /// Identity, task guidance and tool catalog. This is the part of the
    /// prompt that is fingerprinted together with rules and project.
    pub fn base(&self, task: TaskContext, tools: &[Arc<dyn Tool>]) -> String {
        let mut out = self.identity.clone();
        out.push_str(&format!("\n\n[Task: {task}]\n{}\n", task.guidance()));

        let catalog = tool_catalog(tools);
        if !catalog.is_empty() {
            out.push_str("\n[Tools]\n");
            out.push_str(&catalog);
        }
        out
    }

    /// Full system prompt.
    pub fn compose(&self, base: &str, project: &str, history: &str, rules: &str) -> String {
        let mut sections = vec![base.trim_end().to_string()];
        for (header, body) in [("[Project]", project), ("[History]", history), ("[Rules]", rules)] {
            let body = body.trim();
            if !body.is_empty() {
                sections.push(format!("{header}\n{body}"));
            }
        }
        sections.join("\n\n")
    }
}

/// One line per tool, grouped under its category.
fn tool_catalog(tools: &[Arc<dyn Tool>]) -> String {
    let mut groups: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for tool in tools {
        groups
            .entry(tool.category())
            .or_default()
            .push((tool.name(), tool.description()));
    }

    let mut out = String::new();
    for (category, mut entries) in groups {
        entries.sort_by(|a, b| a.0.cmp(b.0));
        out.push_str(&format!("{category}:\n"));
        for (name, description) in entries {
            out.push_str(&format!("- {name}: {description}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codeclaw_core::error::ToolError;
    use codeclaw_core::tool::ToolResult;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "does a thing"
        }
        fn category(&self) -> &str {
            self.1
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("", ""))
        }
    }

    #[test]
    fn detects_task_context() {
        assert_eq!(TaskContext::detect("Fix the crash in parser.rs"), TaskContext::Debugging);
        assert_eq!(TaskContext::detect("add unit tests for the lexer"), TaskContext::Testing);
        assert_eq!(TaskContext::detect("Please refactor this module"), TaskContext::Refactoring);
        assert_eq!(TaskContext::detect("implement a LRU cache"), TaskContext::CodeGeneration);
        assert_eq!(TaskContext::detect("explain how does routing work"), TaskContext::Analysis);
        assert_eq!(TaskContext::detect("hi"), TaskContext::General);
    }

    #[test]
    fn keywords_match_whole_words() {
        // "address" must not count as "add"
        assert_eq!(TaskContext::detect("what is this address"), TaskContext::General);
    }

    #[test]
    fn catalog_is_grouped_and_sorted() {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(Named("shell", "system")),
            Arc::new(Named("write_file", "filesystem")),
            Arc::new(Named("read_file", "filesystem")),
        ];
        let base = PromptBuilder::new("ID").base(TaskContext::General, &tools);
        let fs = base.find("filesystem:").unwrap();
        let read = base.find("- read_file").unwrap();
        let write = base.find("- write_file").unwrap();
        let system = base.find("\nsystem:").unwrap();
        assert!(fs < read && read < write && write < system);
    }

    #[test]
    fn compose_skips_empty_sections() {
        let builder = PromptBuilder::new("ID");
        let prompt = builder.compose("BASE", "Language: Rust", "", "  ");
        assert_eq!(prompt, "BASE\n\n[Project]\nLanguage: Rust");
    }

    #[test]
    fn composition_is_deterministic() {
        let builder = PromptBuilder::default();
        let base = builder.base(TaskContext::Debugging, &[]);
        assert_eq!(
            builder.compose(&base, "p", "h", "r"),
            builder.compose(&base, "p", "h", "r")
        );
    }
}
