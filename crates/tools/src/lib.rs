//! Built-in tools and the execution layer around them.
//!
//! [`ToolExecutor`] runs a single call behind a panic barrier and enriches
//! failures with a diagnosis; [`RetryTracker`] wraps it with per-tool failure
//! history so repeated failures produce a progressively more useful report.

pub mod diagnostics;
pub mod executor;
pub mod read_file;
pub mod retry;
pub mod shell;
pub mod workspace;
pub mod write_file;

use std::path::Path;
use std::sync::Arc;

use codeclaw_core::tool::ToolRegistry;

pub use diagnostics::{ErrorCategory, classify, enhance};
pub use executor::ToolExecutor;
pub use retry::{RetryAttempt, RetryTracker, ToolRetryState};

/// Registry with the built-in file and shell tools rooted at `root`.
pub fn default_registry(root: &Path) -> ToolRegistry {
    let registry = ToolRegistry::new();
    let tools: [Arc<dyn codeclaw_core::tool::Tool>; 3] = [
        Arc::new(read_file::ReadFileTool::new(root)),
        Arc::new(write_file::WriteFileTool::new(root)),
        Arc::new(shell::ShellTool::new(root)),
    ];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!(error = %e, "Skipping built-in tool");
        }
    }
    registry
}
