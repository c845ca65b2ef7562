//! Configuration loading, validation, and management for codeclaw.
//!
//! Loads configuration from `~/.codeclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.codeclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default nucleus sampling (omitted from requests when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_top_p: Option<f32>,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// LLM transport settings (fallback chain, timeouts)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Orchestration loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tiered memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Sensitive tools, command deny patterns, approval timeout
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Heartbeat configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Project root and rules
    #[serde(default)]
    pub project: ProjectConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_top_p", &self.default_top_p)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("llm", &self.llm)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("permissions", &self.permissions)
            .field("heartbeat", &self.heartbeat)
            .field("project", &self.project)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Models tried in order when the primary fails or times out
    #[serde(default)]
    pub fallback_models: Vec<String>,

    /// Per-attempt timeout while a fallback chain is active
    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_secs: u64,

    /// Safety timeout on every request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_fallback_timeout() -> u64 {
    120
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            fallback_models: Vec::new(),
            fallback_timeout_secs: default_fallback_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Nested tool rounds permitted per turn
    #[serde(default = "default_max_tool_depth")]
    pub max_tool_depth: u32,

    /// Truncation continuations per turn
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,

    #[serde(default = "default_true")]
    pub stream: bool,

    /// Concurrency bound for non-sensitive tool calls
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    /// Working-memory decay applied after each turn
    #[serde(default = "default_working_memory_decay")]
    pub working_memory_decay: f32,
}

fn default_max_tool_depth() -> u32 {
    50
}
fn default_max_continuations() -> u32 {
    5
}
fn default_max_parallel_tools() -> usize {
    8
}
fn default_working_memory_decay() -> f32 {
    0.1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_depth: default_max_tool_depth(),
            max_continuations: default_max_continuations(),
            stream: true,
            max_parallel_tools: default_max_parallel_tools(),
            working_memory_decay: default_working_memory_decay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_short_term_cap")]
    pub short_term_cap: usize,

    #[serde(default = "default_working_cap")]
    pub working_cap: usize,

    #[serde(default = "default_long_term_cap")]
    pub long_term_cap: usize,

    /// Short-term size at which compression kicks in
    #[serde(default = "default_compression_trigger")]
    pub compression_trigger: usize,

    /// Short-term items kept verbatim after compression
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Working-memory relevance below which items are evicted first
    #[serde(default = "default_low_water")]
    pub low_water: f32,

    /// Persist the long-term tier between sessions
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Long-term store location (default `~/.codeclaw/memory/long_term.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_short_term_cap() -> usize {
    60
}
fn default_working_cap() -> usize {
    24
}
fn default_long_term_cap() -> usize {
    200
}
fn default_compression_trigger() -> usize {
    40
}
fn default_keep_recent() -> usize {
    16
}
fn default_low_water() -> f32 {
    0.1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_cap: default_short_term_cap(),
            working_cap: default_working_cap(),
            long_term_cap: default_long_term_cap(),
            compression_trigger: default_compression_trigger(),
            keep_recent: default_keep_recent(),
            low_water: default_low_water(),
            persist: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Tools that always need approval, on top of the name heuristics
    #[serde(default)]
    pub sensitive_tools: Vec<String>,

    /// Extra command deny patterns (regexes), on top of the built-ins
    #[serde(default)]
    pub deny_patterns: Vec<String>,

    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,

    /// Approve every sensitive call without asking
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_approval_timeout() -> u64 {
    120
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            sensitive_tools: Vec::new(),
            deny_patterns: Vec::new(),
            approval_timeout_secs: default_approval_timeout(),
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// Every Nth tick runs a reflection
    #[serde(default = "default_reflection_every")]
    pub reflection_every: u64,

    #[serde(default = "default_task_file")]
    pub task_file: String,

    #[serde(default = "default_knowledge_file")]
    pub knowledge_file: String,

    #[serde(default = "default_roadmap_file")]
    pub roadmap_file: String,

    /// Build probe, judged by exit status (e.g. `cargo check`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,

    /// Test probe, judged by exit status (e.g. `cargo test`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
}

fn default_heartbeat_interval() -> u64 {
    1800
}
fn default_reflection_every() -> u64 {
    5
}
fn default_task_file() -> String {
    "TASKS.md".into()
}
fn default_knowledge_file() -> String {
    ".codeclaw/BRAIN.md".into()
}
fn default_roadmap_file() -> String {
    ".codeclaw/ROADMAP.md".into()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_heartbeat_interval(),
            reflection_every: default_reflection_every(),
            task_file: default_task_file(),
            knowledge_file: default_knowledge_file(),
            roadmap_file: default_roadmap_file(),
            build_command: None,
            test_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project root (default: current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Rules file, relative to the root
    #[serde(default = "default_rules_file")]
    pub rules_file: String,
}

fn default_rules_file() -> String {
    ".codeclaw/RULES.md".into()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: None,
            rules_file: default_rules_file(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.codeclaw/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `CODECLAW_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    /// - `ANTHROPIC_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = ["CODECLAW_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY", "ANTHROPIC_API_KEY"]
                .iter()
                .find_map(|key| lookup(key));
        }

        if let Some(provider) = lookup("CODECLAW_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("CODECLAW_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".codeclaw")
    }

    /// Resolved long-term memory path.
    pub fn memory_path(&self) -> PathBuf {
        match &self.memory.path {
            Some(p) => PathBuf::from(p),
            None => Self::config_dir().join("memory").join("long_term.jsonl"),
        }
    }

    /// Resolved project root.
    pub fn project_root(&self) -> PathBuf {
        self.project
            .root
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// API key for `provider`: the provider section wins over the global key.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if let Some(top_p) = self.default_top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(ConfigError::ValidationError(
                "default_top_p must be between 0.0 and 1.0".into(),
            ));
        }

        if self.agent.max_tool_depth == 0 {
            return Err(ConfigError::ValidationError("agent.max_tool_depth must be > 0".into()));
        }

        if self.agent.max_parallel_tools == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_parallel_tools must be > 0".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.agent.working_memory_decay) {
            return Err(ConfigError::ValidationError(
                "agent.working_memory_decay must be in [0.0, 1.0)".into(),
            ));
        }

        let m = &self.memory;
        if m.short_term_cap == 0 || m.working_cap == 0 || m.long_term_cap == 0 {
            return Err(ConfigError::ValidationError("memory caps must be > 0".into()));
        }
        if m.keep_recent >= m.compression_trigger {
            return Err(ConfigError::ValidationError(
                "memory.keep_recent must be smaller than memory.compression_trigger".into(),
            ));
        }
        if m.compression_trigger > m.short_term_cap {
            return Err(ConfigError::ValidationError(
                "memory.compression_trigger must not exceed memory.short_term_cap".into(),
            ));
        }

        for pattern in &self.permissions.deny_patterns {
            if pattern.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "permissions.deny_patterns must not contain empty patterns".into(),
                ));
            }
        }

        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat.interval_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.default_provider).is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_top_p: None,
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            permissions: PermissionsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            project: ProjectConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.agent.max_tool_depth, 50);
        assert_eq!(config.agent.max_continuations, 5);
        assert_eq!(config.permissions.approval_timeout_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.memory.short_term_cap, config.memory.short_term_cap);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn keep_recent_must_be_below_trigger() {
        let mut config = AppConfig::default();
        config.memory.keep_recent = 40;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_recent"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn load_from_file_parses_and_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        std::fs::write(&path, "default_model = \"gpt-4o\"\n[agent]\nmax_parallel_tools = 2\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.agent.max_parallel_tools, 2);

        std::fs::write(&path, "default_model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));

        std::fs::write(&path, "default_top_p = 1.5").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let toml_str = r#"
default_provider = "anthropic"

[llm]
fallback_models = ["gpt-4o-mini", "claude-3-haiku"]

[permissions]
sensitive_tools = ["deploy"]
deny_patterns = ["terraform\\s+destroy"]

[heartbeat]
enabled = true
interval_secs = 60
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.llm.fallback_models.len(), 2);
        assert_eq!(config.llm.fallback_timeout_secs, 120);
        assert_eq!(config.permissions.sensitive_tools, vec!["deploy"]);
        assert_eq!(config.permissions.approval_timeout_secs, 120);
        assert_eq!(config.heartbeat.reflection_every, 5);
        assert_eq!(config.heartbeat.task_file, "TASKS.md");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "OPENAI_API_KEY" => Some("sk-openai".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant".into()),
            "CODECLAW_MODEL" => Some("gpt-4o".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn provider_key_overrides_global() {
        let mut config = AppConfig {
            api_key: Some("global".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("scoped".into()),
                api_url: None,
                default_model: None,
            },
        );
        assert_eq!(config.api_key_for("anthropic").as_deref(), Some("scoped"));
        assert_eq!(config.api_key_for("openai").as_deref(), Some("global"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("compression_trigger"));
    }
}
