//! LLM provider implementations for codeclaw.
//!
//! A single HTTP client ([`LlmClient`]) speaks one of two wire dialects:
//! OpenAI-compatible Chat Completions or the Anthropic Messages API. The
//! router builds one client per configured backend.

pub mod anthropic;
pub mod client;
pub mod dialect;
pub mod fallback;
pub mod openai_compat;
pub mod ratelimit;
pub mod router;
pub mod sse;

pub use anthropic::AnthropicDialect;
pub use client::LlmClient;
pub use dialect::Dialect;
pub use fallback::FallbackPolicy;
pub use openai_compat::OpenAiDialect;
pub use router::{ProviderRouter, build_from_config};
