//! Model failover: try an ordered list of candidate models until one answers.
//!
//! The primary model goes first. When it is a free-tier model (id ending in
//! `:free`) a fixed list of other free-tier models is appended. A rate-limit
//! signal waits a short backoff before moving on; any other failure moves on
//! immediately. Each candidate is tried once per call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Suffix marking a free-tier model id.
pub const FREE_TIER_SUFFIX: &str = ":free";

/// Free-tier models tried after a free-tier primary.
pub const FREE_TIER_FALLBACKS: [&str; 5] = [
    "google/gemini-2.0-flash-exp:free",
    "google/gemini-flash-1.5-8b:free",
    "google/gemini-flash-1.5:free",
    "mistralai/mistral-7b-instruct:free",
    "qwen/qwen-2-7b-instruct:free",
];

/// Wait after a rate-limited candidate before trying the next one.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Ordered, de-duplicated candidate list for `primary`.
pub fn candidate_models(primary: &str) -> Vec<String> {
    let mut candidates = vec![primary.to_string()];
    if primary.ends_with(FREE_TIER_SUFFIX) {
        for model in FREE_TIER_FALLBACKS {
            if !candidates.iter().any(|c| c == model) {
                candidates.push(model.to_string());
            }
        }
    }
    candidates
}

/// Text produced by a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Candidate that answered.
    pub model: String,
    /// Candidates tried, including the one that answered.
    pub attempts: u32,
}

/// Wraps a provider with the candidate-model failover policy.
pub struct FailoverProvider {
    inner: Arc<dyn LlmProvider>,
    candidates: Vec<String>,
    rate_limit_backoff: Duration,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl FailoverProvider {
    /// Candidates are derived from the provider's default model.
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        let candidates = candidate_models(inner.model_name());
        Self {
            inner,
            candidates,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = Some(max_tokens);
        self.temperature = Some(temperature);
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Run one generation across the candidate list.
    ///
    /// Returns the first success, or the last error once every candidate
    /// has failed.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        history: &[ChatMessage],
    ) -> Result<Generation, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user_message));

        let mut last_error = None;
        let mut attempts = 0u32;

        for model in &self.candidates {
            attempts += 1;
            let mut request = CompletionRequest::new(messages.clone()).with_model(model.clone());
            if let Some(max_tokens) = self.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            if let Some(temperature) = self.temperature {
                request = request.with_temperature(temperature);
            }

            match self.inner.complete(request).await {
                Ok(response) => {
                    if attempts > 1 {
                        info!(model = %model, attempts, "Generation succeeded on fallback model");
                    }
                    return Ok(Generation {
                        text: response.content,
                        model: model.clone(),
                        attempts,
                    });
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(model = %model, "Model rate limited, trying next candidate: {e}");
                    last_error = Some(e);
                    if !self.rate_limit_backoff.is_zero() {
                        tokio::time::sleep(self.rate_limit_backoff).await;
                    }
                }
                Err(e) => {
                    warn!(model = %model, "Model failed, trying next candidate: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(LlmError::NoCandidates))
    }
}
