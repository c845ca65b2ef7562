//! Wiring from `AppConfig` to a running agent.

use std::sync::Arc;
use std::time::Duration;

use codeclaw_agent::{Agent, AgentSettings};
use codeclaw_config::AppConfig;
use codeclaw_core::event::EventBus;
use codeclaw_core::memory::LongTermStore;
use codeclaw_core::project::ScannedProject;
use codeclaw_heartbeat::{CommandHealth, Heartbeat, HeartbeatSettings};
use codeclaw_memory::{JsonlStore, MemoryManager, MemorySettings, NoopStore};
use codeclaw_security::{AuditLogger, PermissionSettings, Permissions, TracingSink};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Providers that run locally and need no API key.
const LOCAL_PROVIDERS: &[&str] = &["ollama", "vllm", "llamacpp", "llama.cpp"];

pub fn agent_settings(config: &AppConfig) -> AgentSettings {
    let model = config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone());

    AgentSettings {
        model,
        temperature: config.default_temperature,
        top_p: config.default_top_p,
        max_tokens: Some(config.default_max_tokens),
        max_tool_depth: config.agent.max_tool_depth,
        max_continuations: config.agent.max_continuations,
        stream: config.agent.stream,
        max_parallel_tools: config.agent.max_parallel_tools,
        working_memory_decay: config.agent.working_memory_decay,
        approval_timeout: Duration::from_secs(config.permissions.approval_timeout_secs),
        compression_trigger: config.memory.compression_trigger,
        ..AgentSettings::default()
    }
}

pub fn memory_settings(config: &AppConfig) -> MemorySettings {
    let m = &config.memory;
    MemorySettings {
        short_term_cap: m.short_term_cap,
        working_cap: m.working_cap,
        long_term_cap: m.long_term_cap,
        compression_trigger: m.compression_trigger,
        keep_recent: m.keep_recent,
        low_water: m.low_water,
    }
}

pub fn permission_settings(config: &AppConfig) -> PermissionSettings {
    PermissionSettings {
        sensitive_tools: config.permissions.sensitive_tools.clone(),
        deny_patterns: config.permissions.deny_patterns.clone(),
        auto_approve: config.permissions.auto_approve,
    }
}

/// Heartbeat file paths are resolved against the project root.
pub fn heartbeat_settings(config: &AppConfig) -> HeartbeatSettings {
    let root = config.project_root();
    let hb = &config.heartbeat;
    HeartbeatSettings {
        interval: Duration::from_secs(hb.interval_secs),
        reflection_every: hb.reflection_every,
        task_file: root.join(&hb.task_file),
        knowledge_file: root.join(&hb.knowledge_file),
        roadmap_file: root.join(&hb.roadmap_file),
    }
}

pub fn long_term_store(config: &AppConfig) -> Arc<dyn LongTermStore> {
    if config.memory.persist {
        Arc::new(JsonlStore::new(config.memory_path()))
    } else {
        Arc::new(NoopStore)
    }
}

/// Memory manager with the long-term tier loaded from disk. A store that
/// fails to load starts empty rather than blocking the session.
pub async fn load_memory(config: &AppConfig) -> Arc<MemoryManager> {
    let memory = Arc::new(MemoryManager::new(
        memory_settings(config),
        long_term_store(config),
    ));
    match memory.load().await {
        Ok(count) => info!(items = count, "Long-term memory loaded"),
        Err(e) => warn!(error = %e, "Starting with empty long-term memory"),
    }
    memory
}

pub fn needs_api_key(config: &AppConfig) -> bool {
    !LOCAL_PROVIDERS.contains(&config.default_provider.as_str()) && !config.has_api_key()
}

pub async fn build_agent(config: &AppConfig) -> Result<Arc<Agent>, Box<dyn std::error::Error>> {
    let router = codeclaw_providers::build_from_config(config)?;
    let provider = router
        .default()
        .ok_or("No default provider configured")?;

    let root = config.project_root();
    let registry = Arc::new(codeclaw_tools::default_registry(&root));
    let memory = load_memory(config).await;
    let permissions = Permissions::new(&permission_settings(config))?;

    let agent = Agent::new(provider, registry, memory, agent_settings(config))
        .with_permissions(permissions)
        .with_audit(Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)])))
        .with_event_bus(Arc::new(EventBus::default()))
        .with_project(Arc::new(ScannedProject::new(&root)))
        .with_rules_file(root.join(&config.project.rules_file));

    Ok(Arc::new(agent))
}

/// Start the heartbeat when enabled. It stops with the agent.
pub fn spawn_heartbeat(config: &AppConfig, agent: &Arc<Agent>) -> Option<JoinHandle<()>> {
    if !config.heartbeat.enabled {
        return None;
    }
    let health = CommandHealth::new(config.project_root())
        .with_build_command(config.heartbeat.build_command.clone())
        .with_test_command(config.heartbeat.test_command.clone());
    let heartbeat = Heartbeat::new(heartbeat_settings(config), agent.clone(), Arc::new(health))
        .with_event_bus(agent.events().clone());
    Some(Arc::new(heartbeat).spawn(agent.lifetime()))
}
