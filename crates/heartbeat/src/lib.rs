//! Background heartbeat for codeclaw.
//!
//! Every interval the heartbeat reads project health and the task list. When
//! something needs attention it runs a turn on the agent; because turns share
//! the agent's turn lock, a heartbeat never overlaps a user turn. Every Nth
//! tick runs a reflection instead and appends the answer to the knowledge
//! journal.

pub mod health;
pub mod notes;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use codeclaw_agent::Agent;
use codeclaw_core::error::{Error, Result};
use codeclaw_core::event::{DomainEvent, EventBus};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use health::{CheckStatus, CommandHealth, HealthSource, ProjectHealth, StaticHealth};

/// Whatever runs heartbeat prompts. [`Agent`] is the production target.
#[async_trait]
pub trait HeartbeatTarget: Send + Sync {
    async fn run_prompt(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl HeartbeatTarget for Agent {
    async fn run_prompt(&self, prompt: &str) -> Result<String> {
        self.chat(prompt).await
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    /// Every Nth tick reflects. Zero disables reflection.
    pub reflection_every: u64,
    pub task_file: PathBuf,
    pub knowledge_file: PathBuf,
    pub roadmap_file: PathBuf,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            reflection_every: 5,
            task_file: "TASKS.md".into(),
            knowledge_file: ".codeclaw/BRAIN.md".into(),
            roadmap_file: ".codeclaw/ROADMAP.md".into(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Healthy and nothing pending.
    Idle,
    /// Woke the agent about pending tasks or failing checks.
    Woke { reply: String },
    /// Ran a reflection and journaled it.
    Reflected { reply: String },
}

pub struct Heartbeat {
    settings: HeartbeatSettings,
    target: Arc<dyn HeartbeatTarget>,
    health: Arc<dyn HealthSource>,
    events: Option<Arc<EventBus>>,
    ticks: AtomicU64,
}

impl Heartbeat {
    pub fn new(
        settings: HeartbeatSettings,
        target: Arc<dyn HeartbeatTarget>,
        health: Arc<dyn HealthSource>,
    ) -> Self {
        Self {
            settings,
            target,
            health,
            events: None,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &HeartbeatSettings {
        &self.settings
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run one tick now.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let tasks_md = notes::read_optional(&self.settings.task_file)
            .await
            .map_err(|e| io_error(&self.settings.task_file, e))?;
        let pending = notes::pending_tasks(&tasks_md);
        let mut health = self.health.check().await;
        health.pending_tasks = pending.len();

        let reflect = self.settings.reflection_every > 0 && tick % self.settings.reflection_every == 0;
        debug!(tick, reflect, critical = health.is_critical(), pending = pending.len(), "Heartbeat tick");

        let outcome = if reflect {
            let prompt = self.reflection_prompt(&health).await?;
            let reply = self.target.run_prompt(&prompt).await?;
            notes::append_entry(&self.settings.knowledge_file, Utc::now(), &reply)
                .await
                .map_err(|e| io_error(&self.settings.knowledge_file, e))?;
            info!(tick, journal = %self.settings.knowledge_file.display(), "Reflection journaled");
            TickOutcome::Reflected { reply }
        } else if health.is_critical() || !pending.is_empty() {
            let reply = self.target.run_prompt(&wake_prompt(&health, &pending)).await?;
            info!(tick, pending = pending.len(), "Heartbeat woke the agent");
            TickOutcome::Woke { reply }
        } else {
            TickOutcome::Idle
        };

        if outcome != TickOutcome::Idle
            && let Some(events) = &self.events
        {
            events.publish(DomainEvent::HeartbeatFired {
                tick,
                reflection: reflect,
                timestamp: Utc::now(),
            });
        }
        Ok(outcome)
    }

    /// Tick every interval until `cancel` fires. The first tick comes one
    /// interval after the call.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.interval;
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Heartbeat started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match self.tick().await {
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        debug!("Heartbeat turn was stopped");
                    }
                    Err(e) => warn!(error = %e, "Heartbeat tick failed"),
                }
            }
            info!("Heartbeat stopped");
        })
    }

    async fn reflection_prompt(&self, health: &ProjectHealth) -> Result<String> {
        let knowledge = notes::read_optional(&self.settings.knowledge_file)
            .await
            .map_err(|e| io_error(&self.settings.knowledge_file, e))?;
        let roadmap = notes::read_optional(&self.settings.roadmap_file)
            .await
            .map_err(|e| io_error(&self.settings.roadmap_file, e))?;

        let mut prompt = String::from(
            "[Heartbeat: reflection]\n\
             Step back from individual tasks and review recent work. \
             Note what went well, what keeps going wrong, and what to do differently. \
             Answer with short lessons worth keeping; your answer is appended to the knowledge journal.\n",
        );
        prompt.push_str(&format!("\n[Health]\n{}\n", health.render()));
        prompt.push_str(&format!(
            "\n[Knowledge: {}]\n{}\n",
            self.settings.knowledge_file.display(),
            or_none(notes::tail_excerpt(&knowledge))
        ));
        prompt.push_str(&format!(
            "\n[Roadmap: {}]\n{}\n",
            self.settings.roadmap_file.display(),
            or_none(notes::head_excerpt(&roadmap))
        ));
        Ok(prompt)
    }
}

fn wake_prompt(health: &ProjectHealth, pending: &[String]) -> String {
    let mut prompt = String::from(
        "[Heartbeat]\n\
         Periodic check-in. Fix failing checks first, otherwise pick the most \
         important pending task and make progress on it. Report what you did.\n",
    );
    prompt.push_str(&format!("\n[Health]\n{}\n", health.render()));
    if !pending.is_empty() {
        prompt.push_str("\n[Pending tasks]\n");
        for task in pending {
            prompt.push_str(&format!("- {task}\n"));
        }
    }
    prompt
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() { "(empty)" } else { text.trim() }
}

fn io_error(path: &std::path::Path, e: std::io::Error) -> Error {
    Error::Internal(format!("{}: {e}", path.display()))
}
