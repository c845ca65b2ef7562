//! Provider router: builds one [`LlmClient`] per configured backend and
//! picks the right wire dialect for each.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codeclaw_config::AppConfig;
use codeclaw_core::error::ProviderError;
use codeclaw_core::provider::Provider;
use tracing::debug;

use crate::anthropic::AnthropicDialect;
use crate::client::LlmClient;
use crate::dialect::Dialect;
use crate::openai_compat::OpenAiDialect;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// The provider named by `default_provider`.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Wire dialect for a provider name.
pub fn dialect_for(provider_name: &str) -> Arc<dyn Dialect> {
    match provider_name {
        "anthropic" => Arc::new(AnthropicDialect::default()),
        _ => Arc::new(OpenAiDialect),
    }
}

fn build_client(config: &AppConfig, name: &str) -> Result<LlmClient, ProviderError> {
    let base_url = config
        .providers
        .get(name)
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));
    let api_key = config.api_key_for(name).unwrap_or_default();

    debug!(provider = name, base_url = %base_url, "Building provider");

    Ok(LlmClient::new(name, base_url, api_key, dialect_for(name))?
        .with_request_timeout(Duration::from_secs(config.llm.request_timeout_secs))
        .with_fallback_models(
            config.llm.fallback_models.clone(),
            Duration::from_secs(config.llm.fallback_timeout_secs),
        ))
}

/// Build providers from configuration. The default provider is always present.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);

    for name in config.providers.keys() {
        router.register(name.clone(), Arc::new(build_client(config, name)?));
    }

    if router.get(&config.default_provider).is_none() {
        let client = build_client(config, &config.default_provider)?;
        router.register(config.default_provider.clone(), Arc::new(client));
    }

    Ok(router)
}

/// Default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
