//! Generation gateway: prompt-building wrappers over the failover provider.
//!
//! The wrappers hold no state of their own. Callers wrap every call in
//! [`with_timeout`]; the gateway's internal rate-limit backoff is separate
//! from that deadline.

use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::failover::{FailoverProvider, Generation};
use crate::llm::prompts;
use crate::llm::provider::ChatMessage;
use crate::practice::{PracticeSession, PracticeType, Rating, UserProgress};
use crate::profile::UserProfile;

/// Bound a generation call by a caller-side deadline.
///
/// When the deadline passes the in-flight call is dropped and
/// [`LlmError::Timeout`] is returned.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout { after: limit }),
    }
}

pub struct GenerationGateway {
    failover: FailoverProvider,
}

impl GenerationGateway {
    pub fn new(failover: FailoverProvider) -> Self {
        Self { failover }
    }

    pub fn candidates(&self) -> &[String] {
        self.failover.candidates()
    }

    /// Raw generation with the shared persona plus `system_prompt`.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        history: &[ChatMessage],
    ) -> Result<Generation, LlmError> {
        self.failover
            .generate(system_prompt, user_message, history)
            .await
    }

    pub async fn generate_practice(
        &self,
        profile: &UserProfile,
        practice_type: PracticeType,
        duration: u32,
    ) -> Result<Generation, LlmError> {
        let prompt = prompts::practice_prompt(profile, practice_type, duration);
        self.generate(prompts::SYSTEM_PROMPT, &prompt, &[]).await
    }

    pub async fn generate_onboarding_reply(
        &self,
        step: &str,
        answer: &str,
    ) -> Result<String, LlmError> {
        let prompt = prompts::onboarding_reply_prompt(step, answer);
        Ok(self.generate(prompts::SYSTEM_PROMPT, &prompt, &[]).await?.text)
    }

    pub async fn generate_general_reply(
        &self,
        message: &str,
        profile: Option<&UserProfile>,
    ) -> Result<String, LlmError> {
        let prompt = prompts::general_prompt(profile, message);
        Ok(self.generate(prompts::SYSTEM_PROMPT, &prompt, &[]).await?.text)
    }

    /// Summary of a finished practice. Asks for at most 500 characters but
    /// does not truncate.
    pub async fn generate_summary(
        &self,
        practice: &PracticeSession,
        rating: Rating,
    ) -> Result<String, LlmError> {
        let prompt = prompts::summary_prompt(practice, rating);
        Ok(self.generate(prompts::SYSTEM_PROMPT, &prompt, &[]).await?.text)
    }

    pub async fn generate_insight(
        &self,
        profile: &UserProfile,
        progress: &UserProgress,
        recent: &[PracticeSession],
    ) -> Result<String, LlmError> {
        let prompt = prompts::insight_prompt(profile, progress, recent);
        Ok(self.generate(prompts::SYSTEM_PROMPT, &prompt, &[]).await?.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_maps_to_llm_error() {
        let result: Result<(), LlmError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, LlmError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
