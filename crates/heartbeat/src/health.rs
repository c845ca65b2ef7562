//! Project health signals read on every heartbeat tick.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Outcome of a build or test probe. `Unknown` when no probe is configured
/// or the probe could not be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckStatus {
    Passing,
    Failing,
    #[default]
    Unknown,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Failing => "failing",
            CheckStatus::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectHealth {
    pub build: CheckStatus,
    pub tests: CheckStatus,
    /// Files with uncommitted changes.
    pub dirty_files: usize,
    pub pending_tasks: usize,
}

impl ProjectHealth {
    /// A failing build or test run. Dirty files alone are not critical.
    pub fn is_critical(&self) -> bool {
        self.build == CheckStatus::Failing || self.tests == CheckStatus::Failing
    }

    pub fn render(&self) -> String {
        format!(
            "build: {}\ntests: {}\nuncommitted files: {}\npending tasks: {}",
            self.build, self.tests, self.dirty_files, self.pending_tasks
        )
    }
}

/// Supplies the health snapshot for a tick.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn check(&self) -> ProjectHealth;
}

/// A fixed snapshot. Useful when health is tracked elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticHealth(pub ProjectHealth);

#[async_trait]
impl HealthSource for StaticHealth {
    async fn check(&self) -> ProjectHealth {
        self.0.clone()
    }
}

/// Probes a working tree: `git status --porcelain` for dirty files plus
/// optional build and test commands judged by exit status.
#[derive(Debug, Clone)]
pub struct CommandHealth {
    root: PathBuf,
    build_command: Option<String>,
    test_command: Option<String>,
    timeout: Duration,
}

impl CommandHealth {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            build_command: None,
            test_command: None,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_build_command(mut self, command: Option<String>) -> Self {
        self.build_command = command;
        self
    }

    pub fn with_test_command(mut self, command: Option<String>) -> Self {
        self.test_command = command;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe(&self, command: Option<&str>) -> CheckStatus {
        let Some(command) = command else {
            return CheckStatus::Unknown;
        };
        let mut cmd = shell(command);
        cmd.current_dir(&self.root).kill_on_drop(true);
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => CheckStatus::Passing,
            Ok(Ok(_)) => CheckStatus::Failing,
            Ok(Err(e)) => {
                debug!(command, error = %e, "Health probe could not start");
                CheckStatus::Unknown
            }
            Err(_) => {
                debug!(command, "Health probe timed out");
                CheckStatus::Failing
            }
        }
    }

    async fn dirty_files(&self) -> usize {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .count(),
            _ => 0,
        }
    }
}

#[async_trait]
impl HealthSource for CommandHealth {
    async fn check(&self) -> ProjectHealth {
        let (build, tests, dirty_files) = tokio::join!(
            self.probe(self.build_command.as_deref()),
            self.probe(self.test_command.as_deref()),
            self.dirty_files(),
        );
        ProjectHealth {
            build,
            tests,
            dirty_files,
            pending_tasks: 0,
        }
    }
}

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}
