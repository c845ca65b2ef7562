//! `read_file`: return a file's contents.

use std::path::PathBuf;

use async_trait::async_trait;
use codeclaw_core::error::ToolError;
use codeclaw_core::tool::{Tool, ToolResult};

use crate::workspace;

/// Files larger than this are truncated in the output.
const MAX_BYTES: usize = 256 * 1024;

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the project."
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the project root"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'path' argument".into()))?;

        let resolved = match workspace::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure("", e)),
        };

        match tokio::fs::read(&resolved).await {
            Ok(bytes) => {
                let total = bytes.len();
                let mut content = String::from_utf8_lossy(&bytes[..total.min(MAX_BYTES)]).into_owned();
                if total > MAX_BYTES {
                    content.push_str(&format!("\n[truncated: {total} bytes total]"));
                }
                Ok(ToolResult::ok("", content)
                    .with_data("path", path)
                    .with_data("bytes", total))
            }
            Err(e) => Ok(ToolResult::failure("", format!("failed to read {path}: {e}"))),
        }
    }
}
