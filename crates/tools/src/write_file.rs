//! `write_file`: create or overwrite a file.

use std::path::PathBuf;

use async_trait::async_trait;
use codeclaw_core::error::ToolError;
use codeclaw_core::tool::{Tool, ToolResult};
use tracing::debug;

use crate::workspace;

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the project, creating parent directories as needed."
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
                },
                "content": {
                    "type": "string",
                    "description": "Full new contents of the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'content' argument".into()))?;

        let resolved = match workspace::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure("", e)),
        };

        if let Some(parent) = resolved.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::failure("", format!("failed to create {}: {e}", parent.display())));
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(()) => {
                debug!(path = %resolved.display(), bytes = content.len(), "File written");
                Ok(ToolResult::ok("", format!("wrote {} bytes to {path}", content.len())).with_data("path", path))
            }
            Err(e) => Ok(ToolResult::failure("", format!("failed to write {path}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path());
        let result = tool
            .execute(json!({"path": "src/new.rs", "content": "fn main() {}"}))
            .await
            .unwrap();
        assert!(result.success, "{}", result.error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/new.rs")).unwrap(),
            "fn main() {}"
        );
    }

    #[tokio::test]
    async fn missing_content_is_an_argument_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path());
        let result = tool.execute(json!({"path": "a.txt"})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
