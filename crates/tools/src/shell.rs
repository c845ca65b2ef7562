//! `shell`: run a command in the project root.
//!
//! Deny patterns are enforced before this tool ever runs; it only bounds
//! execution time.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use codeclaw_core::error::ToolError;
use codeclaw_core::tool::{Tool, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct ShellTool {
    root: PathBuf,
}

impl ShellTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project root and return stdout/stderr. Use this for builds, tests and git."
    }

    fn category(&self) -> &str {
        "system"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Kill the command after this many seconds (default 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'command' argument".into()))?;
        let timeout = Duration::from_secs(arguments["timeout_secs"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS));

        debug!(command = %command, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.root).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "shell".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: "shell".into(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            let text = if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            return Ok(ToolResult::ok("", text).with_data("exit_code", code));
        }

        warn!(command = %command, exit_code = code, "Command failed");
        let error = if stderr.is_empty() {
            format!("[exit code: {code}]")
        } else {
            format!("[exit code: {code}] {stderr}")
        };
        Ok(ToolResult {
            output: stdout,
            ..ToolResult::failure("", error)
        }
        .with_data("exit_code", code))
    }
}
