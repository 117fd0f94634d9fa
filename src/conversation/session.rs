//! Per-user conversation context.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::onboarding::OnboardingFlow;
use super::practice::PracticeStep;
use super::profile_edit::ProfileEditStep;
use super::reminder_setup::ReminderSetupStep;

/// The flow a user is currently in, with its step.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveFlow {
    Onboarding(OnboardingFlow),
    ProfileEdit(ProfileEditStep),
    ReminderSetup(ReminderSetupStep),
    Practice(PracticeStep),
}

impl ActiveFlow {
    pub fn name(&self) -> &'static str {
        match self {
            ActiveFlow::Onboarding(_) => "onboarding",
            ActiveFlow::ProfileEdit(_) => "profile_edit",
            ActiveFlow::ReminderSetup(_) => "reminder_setup",
            ActiveFlow::Practice(_) => "practice",
        }
    }
}

/// Everything the engine remembers about a user between events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub flow: Option<ActiveFlow>,
}

impl SessionContext {
    pub fn clear(&mut self) -> Option<ActiveFlow> {
        self.flow.take()
    }
}

/// Session contexts keyed by user id. An entry exists only while the user
/// is inside a flow.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionContext>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the user's context; a fresh one on first contact.
    pub async fn load(&self, user_id: &str) -> SessionContext {
        self.sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Store the context produced by a successful transition.
    pub async fn commit(&self, user_id: &str, context: SessionContext) {
        let mut sessions = self.sessions.write().await;
        if context.flow.is_some() {
            sessions.insert(user_id.to_string(), context);
        } else {
            sessions.remove(user_id);
        }
    }

    pub async fn active_flow(&self, user_id: &str) -> Option<ActiveFlow> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .and_then(|s| s.flow.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
