//! Stubs shared by the conversation unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::channels::{Channel, MessageStream, OutgoingResponse, StatusUpdate};
use crate::conversation::flow::EngineDeps;
use crate::error::{ChannelError, DatabaseError, LlmError};
use crate::llm::{
    CompletionRequest, CompletionResponse, FailoverProvider, FinishReason, GenerationGateway,
    LlmProvider, Role,
};
use crate::practice::{PracticeCompletion, PracticeSession, UserProgress};
use crate::profile::{ExperienceLevel, NewUser, UserProfile};
use crate::scheduler::ReminderScheduler;
use crate::store::{Database, LibSqlBackend};

pub const SUMMARY_MARKER: &str = "under 500 characters";
pub const SUMMARY_TEXT: &str = "A calm, grounded session. Keep breathing slowly next time.";

#[derive(Default)]
pub struct StubLlm {
    pub prompts: Mutex<Vec<String>>,
    pub failing: AtomicBool,
    pub stalled: AtomicBool,
}

impl StubLlm {
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Make every call hang far past any generation deadline.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub/model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "offline".into(),
            });
        }
        let content = if prompt.contains(SUMMARY_MARKER) {
            SUMMARY_TEXT.to_string()
        } else {
            "Sun salutation x3, then child's pose.".to_string()
        };
        Ok(CompletionResponse {
            content,
            model: "stub/model".into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, OutgoingResponse)>>,
}

impl RecordingChannel {
    pub fn last(&self) -> Option<OutgoingResponse> {
        self.sent.lock().unwrap().last().map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send(&self, address: &str, response: OutgoingResponse) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), response));
        Ok(())
    }

    async fn send_status(&self, _: &str, _: StatusUpdate) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

pub struct Harness {
    pub deps: EngineDeps,
    pub llm: Arc<StubLlm>,
    pub channel: Arc<RecordingChannel>,
    pub store: Arc<LibSqlBackend>,
}

pub async fn harness() -> Harness {
    let llm = Arc::new(StubLlm::default());
    let channel = Arc::new(RecordingChannel::default());
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let failover = FailoverProvider::new(llm.clone()).with_rate_limit_backoff(Duration::ZERO);
    let deps = EngineDeps {
        store: store.clone(),
        gateway: Arc::new(GenerationGateway::new(failover)),
        scheduler: ReminderScheduler::new(channel.clone(), chrono_tz::Europe::Kyiv),
        channel: channel.clone(),
        timezone: chrono_tz::Europe::Kyiv,
        generation_timeout: Duration::from_secs(5),
    };
    Harness {
        deps,
        llm,
        channel,
        store,
    }
}

/// A stored user who finished onboarding.
pub async fn onboarded_user(store: &dyn Database, user_id: &str) -> UserProfile {
    let mut profile = store.create_user(&NewUser::new(user_id)).await.unwrap();
    profile.goals = Some("flexibility".into());
    profile.experience_level = Some(ExperienceLevel::Intermediate);
    profile.available_duration = Some(30);
    profile.current_state = UserProfile::STATE_ACTIVE.into();
    store.save_profile(&profile).await.unwrap();
    profile
}

/// Store whose profile writes can be switched to fail; everything else is
/// served by the wrapped backend.
pub struct FlakyStore {
    pub inner: Arc<LibSqlBackend>,
    pub failing_saves: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<LibSqlBackend>) -> Self {
        Self {
            inner,
            failing_saves: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self) {
        self.failing_saves.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Database for FlakyStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        self.inner.get_user(user_id).await
    }

    async fn create_user(&self, user: &NewUser) -> Result<UserProfile, DatabaseError> {
        self.inner.create_user(user).await
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        if self.failing_saves.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("disk I/O error".into()));
        }
        self.inner.save_profile(profile).await
    }

    async fn touch_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.inner.touch_user(user_id, at).await
    }

    async fn list_reminder_users(&self) -> Result<Vec<UserProfile>, DatabaseError> {
        self.inner.list_reminder_users().await
    }

    async fn insert_practice(&self, practice: &PracticeSession) -> Result<(), DatabaseError> {
        self.inner.insert_practice(practice).await
    }

    async fn get_practice(&self, id: Uuid) -> Result<Option<PracticeSession>, DatabaseError> {
        self.inner.get_practice(id).await
    }

    async fn latest_open_practice(
        &self,
        user_id: &str,
    ) -> Result<Option<PracticeSession>, DatabaseError> {
        self.inner.latest_open_practice(user_id).await
    }

    async fn complete_practice(
        &self,
        id: Uuid,
        completion: &PracticeCompletion,
    ) -> Result<PracticeSession, DatabaseError> {
        self.inner.complete_practice(id, completion).await
    }

    async fn set_practice_feedback(&self, id: Uuid, feedback: &str) -> Result<(), DatabaseError> {
        self.inner.set_practice_feedback(id, feedback).await
    }

    async fn count_completed_practices(&self, user_id: &str) -> Result<u32, DatabaseError> {
        self.inner.count_completed_practices(user_id).await
    }

    async fn list_completed_practices(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<PracticeSession>, DatabaseError> {
        self.inner.list_completed_practices(user_id, offset, limit).await
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>, DatabaseError> {
        self.inner.get_progress(user_id).await
    }
}
