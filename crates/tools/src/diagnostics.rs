//! Tool error classification and remediation hints.
//!
//! All matching lives in [`classify`]: one ordered table of substrings,
//! checked against the lowercased error text (and the tool name for the
//! browser family). The first category with a hit wins.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    PermissionDenied,
    PathNotFound,
    InvalidPath,
    FileExists,
    NoSpace,
    SecurityViolation,
    UnknownCommandWindows,
    UnknownCommandUnix,
    BrowserTimeout,
    BrowserNoTab,
    BrowserContextExpired,
    BrowserError,
    UnknownError,
}

/// Category, whether it only applies to browser tools, and its needles.
const TABLE: &[(ErrorCategory, bool, &[&str])] = &[
    (
        ErrorCategory::PermissionDenied,
        false,
        &["permission denied", "access is denied", "operation not permitted", "eacces", "eperm"],
    ),
    (
        ErrorCategory::PathNotFound,
        false,
        &[
            "no such file or directory",
            "cannot find the path",
            "cannot find the file",
            "does not exist",
            "enoent",
        ],
    ),
    (
        ErrorCategory::InvalidPath,
        false,
        &[
            "invalid path",
            "invalid filename",
            "syntax is incorrect",
            "not a directory",
            "is a directory",
            "enotdir",
            "eisdir",
        ],
    ),
    (ErrorCategory::FileExists, false, &["file exists", "already exists", "eexist"]),
    (
        ErrorCategory::NoSpace,
        false,
        &["no space left", "disk full", "not enough space", "enospc"],
    ),
    (
        ErrorCategory::SecurityViolation,
        false,
        &[
            "security",
            "forbidden path",
            "outside workspace",
            "sandbox",
            "path traversal",
            "blocked by policy",
        ],
    ),
    (
        ErrorCategory::UnknownCommandWindows,
        false,
        &["is not recognized as an internal or external command"],
    ),
    (ErrorCategory::UnknownCommandUnix, false, &["command not found"]),
    (ErrorCategory::BrowserTimeout, true, &["timeout", "timed out"]),
    (
        ErrorCategory::BrowserNoTab,
        true,
        &["no tab", "no page", "no active page", "target closed"],
    ),
    (
        ErrorCategory::BrowserContextExpired,
        true,
        &["context expired", "context was destroyed", "execution context", "session closed"],
    ),
];

/// Classify a failed tool call. Deterministic; earliest listed category wins.
pub fn classify(tool_name: &str, error_text: &str) -> ErrorCategory {
    let text = error_text.to_lowercase();
    let browser = tool_name.to_lowercase().starts_with("browser");

    for (category, browser_only, needles) in TABLE {
        if *browser_only && !browser {
            continue;
        }
        if needles.iter().any(|n| text.contains(n)) {
            return *category;
        }
    }

    if browser {
        ErrorCategory::BrowserError
    } else {
        ErrorCategory::UnknownError
    }
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::PathNotFound => "path_not_found",
            Self::InvalidPath => "invalid_path",
            Self::FileExists => "file_exists",
            Self::NoSpace => "no_space",
            Self::SecurityViolation => "security_violation",
            Self::UnknownCommandWindows => "unknown_command_windows",
            Self::UnknownCommandUnix => "unknown_command_unix",
            Self::BrowserTimeout => "browser_timeout",
            Self::BrowserNoTab => "browser_no_tab",
            Self::BrowserContextExpired => "browser_context_expired",
            Self::BrowserError => "browser_error",
            Self::UnknownError => "unknown_error",
        }
    }

    /// One-line explanation for the model.
    pub fn summary(self) -> &'static str {
        match self {
            Self::PermissionDenied => "The process lacks permission for this operation.",
            Self::PathNotFound => "The file or directory does not exist.",
            Self::InvalidPath => "The path is malformed or names the wrong kind of entry.",
            Self::FileExists => "The target already exists.",
            Self::NoSpace => "The disk is full.",
            Self::SecurityViolation => "The operation was blocked by a security policy.",
            Self::UnknownCommandWindows | Self::UnknownCommandUnix => "The command is not installed or not on PATH.",
            Self::BrowserTimeout => "The browser operation timed out.",
            Self::BrowserNoTab => "There is no open browser tab to act on.",
            Self::BrowserContextExpired => "The page navigated or closed while the action ran.",
            Self::BrowserError => "The browser reported an error.",
            Self::UnknownError => "The tool failed for an unrecognized reason.",
        }
    }

    pub fn suggestions(self) -> &'static [&'static str] {
        match self {
            Self::PermissionDenied => &[
                "Choose a path inside the project directory",
                "Check file ownership and mode before retrying",
            ],
            Self::PathNotFound => &[
                "List the parent directory to confirm the exact name",
                "Use a path relative to the project root",
            ],
            Self::InvalidPath => &[
                "Remove stray quotes or invalid characters from the path",
                "Check whether the path is a file or a directory",
            ],
            Self::FileExists => &[
                "Read the existing file before overwriting it",
                "Pick a different name",
            ],
            Self::NoSpace => &["Free disk space or write somewhere else"],
            Self::SecurityViolation => &[
                "Stay inside the project workspace",
                "Use a less destructive command",
            ],
            Self::UnknownCommandWindows => &[
                "Use a built-in cmd/PowerShell equivalent",
                "Check that the program is installed and on PATH",
            ],
            Self::UnknownCommandUnix => &[
                "Check the spelling of the command",
                "Verify the program is installed (`which <cmd>`)",
            ],
            Self::BrowserTimeout => &[
                "Wait for the page to finish loading, then retry",
                "Use a more specific selector",
            ],
            Self::BrowserNoTab => &["Open a page before interacting with it"],
            Self::BrowserContextExpired => &["Re-query the element after navigation"],
            Self::BrowserError => &["Take a snapshot of the page to see its current state"],
            Self::UnknownError => &[
                "Re-read the error message and adjust the arguments",
                "Try a simpler variant of the call",
            ],
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append a suggestion block to an error message.
pub fn enhance(tool_name: &str, error: &str) -> (ErrorCategory, String) {
    let category = classify(tool_name, error);
    let mut text = format!("{error}\n\n[{category}] {}\nSuggestions:", category.summary());
    for hint in category.suggestions() {
        text.push_str("\n- ");
        text.push_str(hint);
    }
    (category, text)
}
