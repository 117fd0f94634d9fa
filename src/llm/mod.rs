//! LLM integration for Yoga Assist.
//!
//! A single OpenAI-compatible backend (OpenRouter) sits behind the
//! `LlmProvider` trait. `FailoverProvider` walks the candidate-model list
//! and `GenerationGateway` builds the prompts the conversation needs.

pub mod failover;
pub mod gateway;
pub mod openrouter;
pub mod prompts;
pub mod provider;

pub use failover::{FailoverProvider, Generation, candidate_models};
pub use gateway::{GenerationGateway, with_timeout};
pub use openrouter::OpenRouterProvider;
pub use provider::*;

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Build the production gateway from configuration.
pub fn create_gateway(config: &LlmConfig) -> Result<GenerationGateway, LlmError> {
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenRouterProvider::new(config)?);
    let failover =
        FailoverProvider::new(provider).with_sampling(config.max_tokens, config.temperature);
    tracing::info!(
        model = %config.model,
        candidates = failover.candidates().len(),
        "Using OpenRouter"
    );
    Ok(GenerationGateway::new(failover))
}
