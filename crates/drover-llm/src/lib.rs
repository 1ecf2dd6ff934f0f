pub mod model;
pub mod providers;
pub mod repair;
pub mod retry;

use std::sync::Arc;

use drover_core::config::ModelConfig;
use drover_core::traits::Caller;
use tracing::warn;

pub use model::ModelInvoker;
pub use providers::openai::OpenAiClient;
pub use retry::{Invocation, InvocationSpec, ResilientInvoker};

/// Providers known to serve the OpenAI chat-completions dialect.
const OPENAI_COMPATIBLE: &[&str] = &[
    "openai",
    "azure",
    "dashscope",
    "qwen",
    "deepseek",
    "ollama",
    "vllm",
    "groq",
    "together",
    "openrouter",
];

/// Whether `provider` is one of the OpenAI-compatible providers (case-insensitive).
pub fn is_openai_compatible(provider: &str) -> bool {
    OPENAI_COMPATIBLE
        .iter()
        .any(|known| known.eq_ignore_ascii_case(provider.trim()))
}

/// Create a model caller for the configured provider.
///
/// Every provider goes through the OpenAI-compatible client; unknown names
/// are still tried against `base_url`, with a warning.
pub fn create_caller(config: &ModelConfig) -> Arc<dyn Caller> {
    if !is_openai_compatible(&config.provider) {
        warn!(
            provider = %config.provider,
            "Provider is not a known OpenAI-compatible endpoint, using the OpenAI dialect anyway"
        );
    }
    Arc::new(OpenAiClient::new(config.clone()))
}
