//! Shared plumbing for conversation flows.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;

use crate::channels::{Channel, OutgoingResponse, StatusUpdate};
use crate::error::LlmError;
use crate::llm::{GenerationGateway, with_timeout};
use crate::scheduler::ReminderScheduler;
use crate::store::Database;

/// Services a flow transition may touch.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn Database>,
    pub gateway: Arc<GenerationGateway>,
    pub scheduler: ReminderScheduler,
    pub channel: Arc<dyn Channel>,
    pub timezone: Tz,
    pub generation_timeout: Duration,
}

impl EngineDeps {
    /// Run a generation call under the caller-side deadline with a typing
    /// indicator shown to `address`.
    pub async fn generate<T, F>(&self, address: &str, call: F) -> Result<T, LlmError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        self.generate_within(address, self.generation_timeout, call)
            .await
    }

    /// Same as [`generate`](Self::generate) with a tighter deadline, never
    /// longer than the configured one.
    pub async fn generate_within<T, F>(
        &self,
        address: &str,
        limit: Duration,
        call: F,
    ) -> Result<T, LlmError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        if let Err(e) = self.channel.send_status(address, StatusUpdate::Typing).await {
            tracing::debug!(error = %e, "Typing indicator failed");
        }
        with_timeout(limit.min(self.generation_timeout), call).await
    }
}

/// Result of one flow transition: the single reply to send and the step
/// to wait in next. `next: None` ends the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<S> {
    pub next: Option<S>,
    pub reply: OutgoingResponse,
}

impl<S> Outcome<S> {
    pub fn next(step: S, reply: OutgoingResponse) -> Self {
        Self {
            next: Some(step),
            reply,
        }
    }

    pub fn done(reply: OutgoingResponse) -> Self {
        Self { next: None, reply }
    }

    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Outcome<T> {
        Outcome {
            next: self.next.map(f),
            reply: self.reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::test_support::harness;

    #[tokio::test]
    async fn tighter_limit_cuts_generation_short() {
        let h = harness().await;
        h.llm.stall();
        assert_eq!(h.deps.generation_timeout, Duration::from_secs(5));

        let call = h.deps.gateway.generate_onboarding_reply("goals", "balance");
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            h.deps.generate_within("1", Duration::from_millis(50), call),
        )
        .await
        .expect("limit was not applied");

        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn limit_never_exceeds_configured_timeout() {
        let mut h = harness().await;
        h.llm.stall();
        h.deps.generation_timeout = Duration::from_millis(50);

        let call = h.deps.gateway.generate_onboarding_reply("goals", "balance");
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            h.deps.generate_within("1", Duration::from_secs(60), call),
        )
        .await
        .expect("configured timeout was not applied");

        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }
}
