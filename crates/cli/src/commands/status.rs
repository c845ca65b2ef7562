//! `codeclaw status`: configuration and memory summary.

use codeclaw_config::AppConfig;

use crate::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let root = config.project_root();
    let settings = runtime::agent_settings(&config);

    println!("CodeClaw Status");
    println!("===============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", settings.model);
    println!("  Temperature:  {}", settings.temperature);
    println!(
        "  API key:      {}",
        if runtime::needs_api_key(&config) { "missing" } else { "ok" }
    );
    if !config.llm.fallback_models.is_empty() {
        println!("  Fallbacks:    {}", config.llm.fallback_models.join(", "));
    }
    println!("  Project:      {}", root.display());

    let rules = root.join(&config.project.rules_file);
    println!(
        "  Rules file:   {} ({})",
        rules.display(),
        if rules.is_file() { "found" } else { "absent" }
    );
    println!(
        "  Tools:        {}",
        codeclaw_tools::default_registry(&root).names().join(", ")
    );
    println!(
        "  Limits:       {} tool rounds, {} continuations, {} parallel tools",
        settings.max_tool_depth, settings.max_continuations, settings.max_parallel_tools
    );

    let memory = runtime::load_memory(&config).await;
    let stats = memory.stats().await;
    if config.memory.persist {
        println!("  Memory:       {}", config.memory_path().display());
    } else {
        println!("  Memory:       not persisted");
    }
    println!(
        "                {} long-term items (cap {}), compression at {} messages",
        stats.long_term, config.memory.long_term_cap, config.memory.compression_trigger
    );

    if config.heartbeat.enabled {
        let hb = runtime::heartbeat_settings(&config);
        println!(
            "  Heartbeat:    every {}s, reflection every {} ticks",
            config.heartbeat.interval_secs, hb.reflection_every
        );
        println!("                tasks: {}", hb.task_file.display());
        println!("                journal: {}", hb.knowledge_file.display());
    } else {
        println!("  Heartbeat:    disabled");
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file at {}; using defaults", config_path.display());
    }

    Ok(())
}
