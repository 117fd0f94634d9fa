//! Progress history pages and insights.

use crate::channels::{InlineButton, Keyboard, OutgoingResponse};
use crate::error::Error;
use crate::practice::UserProgress;
use crate::presentation::menus;
use crate::presentation::render::{self, PROGRESS_PAGE_SIZE, ProgressPage};
use crate::profile::UserProfile;

use super::flow::EngineDeps;

/// Practices considered when asking for an insight.
const INSIGHT_HISTORY: u32 = 10;

/// Load and render one page of completed practices. Out-of-range pages
/// are clamped.
pub async fn page(deps: &EngineDeps, user_id: &str, requested: u32) -> Result<OutgoingResponse, Error> {
    let total = deps.store.count_completed_practices(user_id).await?;
    let total_pages = render::page_count(total);
    let page = requested.clamp(1, total_pages);

    let items = deps
        .store
        .list_completed_practices(user_id, (page - 1) * PROGRESS_PAGE_SIZE, PROGRESS_PAGE_SIZE)
        .await?;
    let progress = deps.store.get_progress(user_id).await?;

    let page = ProgressPage {
        page,
        total_pages,
        total,
        items,
        progress,
    };
    let text = render::progress_page(&page, deps.timezone);
    let reply = OutgoingResponse::markdown(text);
    Ok(if total == 0 {
        reply
    } else {
        reply.with_keyboard(menus::progress_buttons(page.page, total_pages))
    })
}

/// Ask the gateway for an observation about the user's recent practice.
pub async fn insight(
    deps: &EngineDeps,
    profile: &UserProfile,
    address: &str,
) -> Result<OutgoingResponse, Error> {
    let progress = deps
        .store
        .get_progress(&profile.user_id)
        .await?
        .unwrap_or_else(|| UserProgress::empty(profile.user_id.clone()));
    let recent = deps
        .store
        .list_completed_practices(&profile.user_id, 0, INSIGHT_HISTORY)
        .await?;

    let back = Keyboard::Inline {
        rows: vec![vec![InlineButton::new("« Back", menus::progress_payload(1))]],
    };
    let text = match deps
        .generate(
            address,
            deps.gateway.generate_insight(profile, &progress, &recent),
        )
        .await
    {
        Ok(insight) => render::insight_message(&insight),
        Err(e) => {
            tracing::warn!(user_id = %profile.user_id, error = %e, "Insight generation failed");
            render::INSIGHT_FAILED.to_string()
        }
    };
    Ok(OutgoingResponse::markdown(text).with_keyboard(back))
}
