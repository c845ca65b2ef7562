//! Permissions: which tools need approval, and which commands never run.
//!
//! A tool is sensitive when it is listed explicitly or when its name says it
//! writes, deletes, executes or publishes something. Commands are checked
//! against built-in destructive patterns plus any configured ones.

use std::collections::BTreeSet;

use regex_lite::Regex;
use tracing::debug;

use crate::error::SecurityError;

/// Name fragments that mark a tool as having external side effects.
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "write", "edit", "delete", "remove", "move", "exec", "shell", "command", "push", "deploy", "ssh",
];

/// Commands that are never allowed, whatever the approver says.
const BUILTIN_DENY_PATTERNS: &[&str] = &[
    r"\brm\s+(-[a-zA-Z]*\s+)*-[a-zA-Z]*[rR][a-zA-Z]*(\s+-[a-zA-Z]*)*\s+(/|/\*|~)(\s|$)",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+if=",
    r":\(\)\s*\{\s*:\|:&\s*\};\s*:",
    r"\b(shutdown|reboot|halt|poweroff)\b",
    r"\bchmod\s+-R\s+777\s+/(\s|$)",
    r">\s*/dev/sd[a-z]",
];

#[derive(Debug, Clone, Default)]
pub struct PermissionSettings {
    /// Tools that always require approval
    pub sensitive_tools: Vec<String>,
    /// Extra deny regexes on top of the built-ins
    pub deny_patterns: Vec<String>,
    /// Approve every sensitive call without asking
    pub auto_approve: bool,
}

pub struct Permissions {
    sensitive: BTreeSet<String>,
    deny: Vec<Regex>,
    auto_approve: bool,
}

impl std::fmt::Debug for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permissions")
            .field("sensitive", &self.sensitive)
            .field("deny_patterns", &self.deny.len())
            .field("auto_approve", &self.auto_approve)
            .finish()
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            sensitive: BTreeSet::new(),
            deny: compile(BUILTIN_DENY_PATTERNS.iter().copied()).unwrap_or_default(),
            auto_approve: false,
        }
    }
}

fn compile<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Vec<Regex>, SecurityError> {
    patterns
        .into_iter()
        .map(|p| {
            Regex::new(p).map_err(|e| SecurityError::InvalidPattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl Permissions {
    pub fn new(settings: &PermissionSettings) -> Result<Self, SecurityError> {
        let deny = compile(
            BUILTIN_DENY_PATTERNS
                .iter()
                .copied()
                .chain(settings.deny_patterns.iter().map(String::as_str)),
        )?;
        Ok(Self {
            sensitive: settings.sensitive_tools.iter().cloned().collect(),
            deny,
            auto_approve: settings.auto_approve,
        })
    }

    /// Whether a call to `tool_name` needs an approval round-trip.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        if self.sensitive.contains(tool_name) {
            return true;
        }
        let lower = tool_name.to_lowercase();
        SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    /// The deny pattern a command matches, if any.
    pub fn denied_by(&self, command: &str) -> Option<&str> {
        let hit = self.deny.iter().find(|re| re.is_match(command)).map(|re| re.as_str());
        if let Some(pattern) = hit {
            debug!(pattern, "Command matched deny pattern");
        }
        hit
    }

    pub fn is_command_allowed(&self, command: &str) -> bool {
        self.denied_by(command).is_none()
    }
}
