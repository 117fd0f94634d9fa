//! Conversation engine: routes each inbound event to navigation, a
//! command, the active flow, or the free-text fallback, in that order.

use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::channels::{IncomingMessage, MessageKind, OutgoingResponse};
use crate::error::Error;
use crate::presentation::menus::{self, Choice, Nav};
use crate::presentation::render;
use crate::profile::{NewUser, UserProfile};

use super::commands::Command;
use super::flow::{EngineDeps, Outcome};
use super::session::{ActiveFlow, SessionContext, SessionStore};
use super::{onboarding, practice, profile_edit, progress, reminder_setup};

pub struct ConversationEngine {
    deps: EngineDeps,
    sessions: SessionStore,
}

impl ConversationEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            sessions: SessionStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process one event and deliver its reply. Failures, including
    /// panics, are logged and answered with the generic notice.
    pub async fn handle(&self, msg: IncomingMessage) {
        let reply = match AssertUnwindSafe(self.process(&msg)).catch_unwind().await {
            Ok(Ok(Some(reply))) => reply,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                error!(
                    user_id = %msg.user_id,
                    channel = %msg.channel,
                    content = %msg.content,
                    error = %e,
                    "Failed to handle message"
                );
                OutgoingResponse::text(render::GENERIC_ERROR)
            }
            Err(_) => {
                error!(
                    user_id = %msg.user_id,
                    channel = %msg.channel,
                    content = %msg.content,
                    "Message handler panicked"
                );
                OutgoingResponse::text(render::GENERIC_ERROR)
            }
        };

        if let Err(e) = self.deps.channel.respond(&msg, reply).await {
            error!(user_id = %msg.user_id, error = %e, "Failed to send reply");
        }
    }

    /// Route one event. The session is only updated when routing succeeds.
    pub async fn process(&self, msg: &IncomingMessage) -> Result<Option<OutgoingResponse>, Error> {
        let mut profile = self.ensure_user(msg).await?;
        let mut session = self.sessions.load(&msg.user_id).await;

        let reply = match &msg.kind {
            MessageKind::Callback { message_id, .. } => self
                .on_callback(msg, &profile)
                .await?
                .map(|reply| reply.editing(*message_id)),
            MessageKind::Text => Some(self.on_text(msg, &mut profile, &mut session).await?),
        };

        self.sessions.commit(&msg.user_id, session).await;
        Ok(reply)
    }

    async fn ensure_user(&self, msg: &IncomingMessage) -> Result<UserProfile, Error> {
        let store = &self.deps.store;
        if let Some(profile) = store.get_user(&msg.user_id).await? {
            store.touch_user(&msg.user_id, Utc::now()).await?;
            return Ok(profile);
        }
        let profile = store
            .create_user(&NewUser {
                user_id: msg.user_id.clone(),
                username: msg.username(),
                first_name: msg.first_name(),
                last_name: msg.last_name(),
            })
            .await?;
        info!(user_id = %msg.user_id, "New user");
        Ok(profile)
    }

    async fn on_text(
        &self,
        msg: &IncomingMessage,
        profile: &mut UserProfile,
        session: &mut SessionContext,
    ) -> Result<OutgoingResponse, Error> {
        let text = msg.content.trim();

        if let Some(nav) = Nav::from_label(text) {
            if let Some(flow) = session.clear() {
                debug!(user_id = %profile.user_id, flow = flow.name(), "Navigation interrupted flow");
            }
            return self.on_nav(nav, profile, session).await;
        }

        if let Some(command) = Command::parse(text) {
            return self.on_command(command, profile, session).await;
        }

        if let Some(flow) = session.flow.take() {
            return self.advance(flow, msg, profile, session).await;
        }

        if let Some(choice) = Choice::parse(text) {
            if let Some(outcome) = practice::resume(&self.deps, profile, choice).await? {
                return Ok(apply(session, outcome.map(ActiveFlow::Practice)));
            }
        }

        Ok(self.fallback(msg, profile).await)
    }

    async fn advance(
        &self,
        flow: ActiveFlow,
        msg: &IncomingMessage,
        profile: &mut UserProfile,
        session: &mut SessionContext,
    ) -> Result<OutgoingResponse, Error> {
        let deps = &self.deps;
        let text = msg.content.trim();
        let address = msg.reply_address();
        let outcome = match flow {
            ActiveFlow::Onboarding(flow) => onboarding::advance(deps, flow, profile, text, address)
                .await?
                .map(ActiveFlow::Onboarding),
            ActiveFlow::ProfileEdit(step) => profile_edit::advance(deps, step, profile, text)
                .await?
                .map(ActiveFlow::ProfileEdit),
            ActiveFlow::ReminderSetup(step) => reminder_setup::advance(deps, step, profile, text)
                .await?
                .map(ActiveFlow::ReminderSetup),
            ActiveFlow::Practice(step) => practice::advance(deps, step, profile, text, address)
                .await?
                .map(ActiveFlow::Practice),
        };
        Ok(apply(session, outcome))
    }

    async fn on_nav(
        &self,
        nav: Nav,
        profile: &mut UserProfile,
        session: &mut SessionContext,
    ) -> Result<OutgoingResponse, Error> {
        let reply = match nav {
            Nav::StartPractice => start_practice(profile, session),
            Nav::Progress => progress::page(&self.deps, &profile.user_id, 1).await?,
            Nav::Profile | Nav::ProfileSettings => apply(
                session,
                profile_edit::start(profile).map(ActiveFlow::ProfileEdit),
            ),
            Nav::ReminderSettings => apply(
                session,
                reminder_setup::start(profile).map(ActiveFlow::ReminderSetup),
            ),
            Nav::Settings => settings(),
            Nav::Help => help(),
            Nav::Language => OutgoingResponse::text(render::LANGUAGE_SOON)
                .with_keyboard(menus::settings_menu()),
            Nav::MainMenu => main_menu(),
        };
        Ok(reply)
    }

    async fn on_command(
        &self,
        command: Command,
        profile: &mut UserProfile,
        session: &mut SessionContext,
    ) -> Result<OutgoingResponse, Error> {
        let interrupted = session.clear();
        if let Some(flow) = &interrupted {
            debug!(user_id = %profile.user_id, flow = flow.name(), ?command, "Command ended flow");
        }

        let reply = match command {
            Command::Start if profile.is_onboarded() => {
                OutgoingResponse::text(render::welcome_back(profile.display_name()))
                    .with_keyboard(menus::main_menu())
            }
            Command::Start => {
                let greeting = render::welcome_new(profile.display_name());
                let outcome = onboarding::start(&self.deps, profile, Some(greeting)).await?;
                apply(session, outcome.map(ActiveFlow::Onboarding))
            }
            Command::Onboarding => {
                let outcome = onboarding::start(&self.deps, profile, None).await?;
                apply(session, outcome.map(ActiveFlow::Onboarding))
            }
            Command::Help => help(),
            Command::Profile => apply(
                session,
                profile_edit::start(profile).map(ActiveFlow::ProfileEdit),
            ),
            Command::Practice => start_practice(profile, session),
            Command::Progress { page } => progress::page(&self.deps, &profile.user_id, page).await?,
            Command::Settings => settings(),
            Command::Cancel => match interrupted {
                Some(flow) => OutgoingResponse::text(cancelled_text(&flow))
                    .with_keyboard(menus::main_menu()),
                None => OutgoingResponse::text(render::NOTHING_TO_CANCEL)
                    .with_keyboard(menus::main_menu()),
            },
        };
        Ok(reply)
    }

    async fn on_callback(
        &self,
        msg: &IncomingMessage,
        profile: &UserProfile,
    ) -> Result<Option<OutgoingResponse>, Error> {
        let payload = msg.content.trim();
        if let Some(page) = menus::parse_progress_payload(payload) {
            return Ok(Some(
                progress::page(&self.deps, &profile.user_id, page).await?,
            ));
        }
        if payload == menus::INSIGHT_PAYLOAD {
            return Ok(Some(
                progress::insight(&self.deps, profile, msg.reply_address()).await?,
            ));
        }
        debug!(user_id = %profile.user_id, payload, "Ignoring unknown callback");
        Ok(None)
    }

    /// Open-ended question for the model, with a static hint on failure.
    async fn fallback(&self, msg: &IncomingMessage, profile: &UserProfile) -> OutgoingResponse {
        let context = profile.is_onboarded().then_some(profile);
        let call = self
            .deps
            .gateway
            .generate_general_reply(msg.content.trim(), context);
        match self.deps.generate(msg.reply_address(), call).await {
            Ok(answer) => OutgoingResponse::markdown(answer),
            Err(e) => {
                warn!(user_id = %profile.user_id, error = %e, "Free-text reply failed");
                OutgoingResponse::text(render::FALLBACK_HINT)
            }
        }
    }
}

/// Record the flow's next step in the session and hand back its reply.
fn apply(session: &mut SessionContext, outcome: Outcome<ActiveFlow>) -> OutgoingResponse {
    session.flow = outcome.next;
    outcome.reply
}

fn start_practice(profile: &UserProfile, session: &mut SessionContext) -> OutgoingResponse {
    if !profile.is_onboarded() {
        return OutgoingResponse::text(render::NEEDS_ONBOARDING);
    }
    apply(session, practice::start().map(ActiveFlow::Practice))
}

fn main_menu() -> OutgoingResponse {
    OutgoingResponse::text(render::MAIN_MENU_TEXT).with_keyboard(menus::main_menu())
}

fn settings() -> OutgoingResponse {
    OutgoingResponse::markdown(render::SETTINGS_TEXT).with_keyboard(menus::settings_menu())
}

fn help() -> OutgoingResponse {
    OutgoingResponse::markdown(render::HELP_TEXT).with_keyboard(menus::main_menu())
}

fn cancelled_text(flow: &ActiveFlow) -> &'static str {
    match flow {
        ActiveFlow::Onboarding(_) => render::ONBOARDING_CANCELLED,
        ActiveFlow::ProfileEdit(_) => render::PROFILE_EDIT_CANCELLED,
        ActiveFlow::ReminderSetup(_) => render::REMINDER_SETUP_CANCELLED,
        ActiveFlow::Practice(_) => render::PRACTICE_CANCELLED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::conversation::practice::PracticeStep;
    use crate::conversation::profile_edit::ProfileEditStep;
    use crate::conversation::test_support::{FlakyStore, harness, onboarded_user};
    use crate::store::Database;

    fn text(user: &str, content: &str) -> IncomingMessage {
        IncomingMessage::new("test", user, content)
    }

    #[tokio::test]
    async fn navigation_interrupts_profile_edit() {
        let h = harness().await;
        onboarded_user(h.store.as_ref(), "1").await;
        let engine = ConversationEngine::new(h.deps.clone());

        engine.handle(text("1", "My profile 👤")).await;
        engine.handle(text("1", "Goals 🎯")).await;
        assert_eq!(
            engine.sessions().active_flow("1").await,
            Some(ActiveFlow::ProfileEdit(ProfileEditStep::EditGoals))
        );

        engine.handle(text("1", "Back 🔙")).await;
        assert!(engine.sessions().active_flow("1").await.is_none());
        let last = h.channel.last().unwrap();
        assert_eq!(last.content, render::MAIN_MENU_TEXT);
        assert_eq!(last.keyboard, Some(menus::main_menu()));

        let stored = h.store.get_user("1").await.unwrap().unwrap();
        assert_eq!(stored.goals.as_deref(), Some("flexibility"));
    }

    #[tokio::test]
    async fn cancel_reports_which_flow_ended() {
        let h = harness().await;
        onboarded_user(h.store.as_ref(), "1").await;
        let engine = ConversationEngine::new(h.deps.clone());

        engine.handle(text("1", "/practice")).await;
        engine.handle(text("1", "/cancel")).await;
        assert_eq!(h.channel.last().unwrap().content, render::PRACTICE_CANCELLED);

        engine.handle(text("1", "/cancel")).await;
        assert_eq!(h.channel.last().unwrap().content, render::NOTHING_TO_CANCEL);
    }

    #[tokio::test]
    async fn first_contact_creates_user_and_starts_onboarding() {
        let h = harness().await;
        let engine = ConversationEngine::new(h.deps.clone());
        let msg = text("7", "/start")
            .with_metadata(serde_json::json!({"first_name": "Olena"}));
        engine.handle(msg).await;

        let stored = h.store.get_user("7").await.unwrap().unwrap();
        assert_eq!(stored.first_name.as_deref(), Some("Olena"));
        assert_eq!(stored.current_state, UserProfile::STATE_ONBOARDING);
        assert!(h.channel.last().unwrap().content.contains("Olena"));
        assert!(matches!(
            engine.sessions().active_flow("7").await,
            Some(ActiveFlow::Onboarding(_))
        ));
    }

    #[tokio::test]
    async fn practice_requires_onboarding() {
        let h = harness().await;
        let engine = ConversationEngine::new(h.deps.clone());
        engine.handle(text("8", "Start practice 🧘")).await;
        assert_eq!(h.channel.last().unwrap().content, render::NEEDS_ONBOARDING);
        assert!(engine.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn free_text_falls_back_to_hint_on_failure() {
        let h = harness().await;
        h.llm.fail();
        let engine = ConversationEngine::new(h.deps.clone());
        engine.handle(text("9", "what is a chakra?")).await;
        assert_eq!(h.channel.last().unwrap().content, render::FALLBACK_HINT);
    }

    #[tokio::test]
    async fn progress_callback_edits_in_place() {
        let h = harness().await;
        onboarded_user(h.store.as_ref(), "1").await;
        let engine = ConversationEngine::new(h.deps.clone());
        let msg = text("1", "prog_2").with_callback("cb", Some(55));
        engine.handle(msg).await;
        assert_eq!(h.channel.last().unwrap().edit_message_id, Some(55));
    }

    #[tokio::test]
    async fn failed_save_keeps_session_and_sends_generic_error() {
        let h = harness().await;
        onboarded_user(h.store.as_ref(), "1").await;
        let store = Arc::new(FlakyStore::new(h.store.clone()));
        let mut deps = h.deps.clone();
        deps.store = store.clone();
        let engine = ConversationEngine::new(deps);

        engine.handle(text("1", "My profile 👤")).await;
        engine.handle(text("1", "Goals 🎯")).await;
        store.fail_saves();
        engine.handle(text("1", "touch my toes")).await;

        assert_eq!(h.channel.last().unwrap().content, render::GENERIC_ERROR);
        assert_eq!(
            engine.sessions().active_flow("1").await,
            Some(ActiveFlow::ProfileEdit(ProfileEditStep::EditGoals))
        );
        let stored = h.store.get_user("1").await.unwrap().unwrap();
        assert_eq!(stored.goals.as_deref(), Some("flexibility"));
    }

    #[tokio::test]
    async fn generation_timeout_reoffers_practice_types() {
        let h = harness().await;
        onboarded_user(h.store.as_ref(), "1").await;
        h.llm.stall();
        let mut deps = h.deps.clone();
        deps.generation_timeout = Duration::from_millis(50);
        let engine = ConversationEngine::new(deps);

        engine.handle(text("1", "/practice")).await;
        tokio::time::timeout(Duration::from_secs(2), engine.handle(text("1", "asana")))
            .await
            .expect("generation was not cut off");

        let last = h.channel.last().unwrap();
        assert_eq!(last.content, render::GENERATION_FAILED);
        assert_eq!(last.keyboard, Some(menus::practice_type_keyboard()));
        assert_eq!(
            engine.sessions().active_flow("1").await,
            Some(ActiveFlow::Practice(PracticeStep::TypeSelection))
        );
        assert!(h.store.latest_open_practice("1").await.unwrap().is_none());
    }
}
