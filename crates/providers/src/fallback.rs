//! Model fallback: ordered retry chain with a per-attempt timeout.
//!
//! When the primary model fails (timeout, rate limit, error), the same request
//! is retried against the next configured model. Cancellation is never
//! retried.

use codeclaw_core::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default per-attempt timeout once fallback models are configured.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback models tried in order after the primary.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    models: Vec<String>,
    timeout: Duration,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            timeout: DEFAULT_FALLBACK_TIMEOUT,
        }
    }
}

impl FallbackPolicy {
    pub fn new(models: Vec<String>, timeout: Duration) -> Self {
        Self { models, timeout }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// The primary followed by every fallback model, without duplicates of the primary.
    pub fn chain(&self, primary: &str) -> Vec<String> {
        let mut chain = vec![primary.to_string()];
        chain.extend(self.models.iter().filter(|m| m.as_str() != primary).cloned());
        chain
    }

    /// Run `attempt` for each model in the chain until one succeeds.
    ///
    /// Without fallback models the primary runs with no extra timeout; the
    /// transport's own timeout applies. Returns the last error when every
    /// model fails.
    pub async fn run<T, F, Fut>(
        &self,
        primary: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let chain = self.chain(primary);
        let total = chain.len();
        let mut last_error = ProviderError::NotConfigured("No models in fallback chain".into());

        for (i, model) in chain.into_iter().enumerate() {
            if i > 0 {
                info!(model = %model, attempt = i + 1, total, "Fallback: trying model");
            }

            let outcome = if self.models.is_empty() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    result = attempt(model.clone()) => Some(result),
                }
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    result = tokio::time::timeout(self.timeout, attempt(model.clone())) => result.ok(),
                }
            };

            match outcome {
                Some(Ok(value)) => return Ok(value),
                Some(Err(e)) if e.is_cancelled() => return Err(e),
                Some(Err(e)) => {
                    warn!(model = %model, error = %e, "Fallback: model failed, trying next");
                    last_error = e;
                }
                None => {
                    warn!(
                        model = %model,
                        timeout_secs = self.timeout.as_secs(),
                        "Fallback: model timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Model '{}' timed out after {}s",
                        model,
                        self.timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}
