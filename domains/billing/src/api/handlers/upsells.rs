//! Upsell prompts shown inside a team

use axum::extract::{Path, State};
use tenantry_auth::AuthUser;
use tenantry_common::{ApiResponse, Result};
use tenantry_teams::{Prompt, PromptType};

use crate::api::middleware::BillingState;
use crate::api::support::billing_team;

/// **GET /teams/{slug}/upsells**
///
/// Undismissed upsell prompts for the caller in this team, highest priority
/// first.
pub async fn list_upsells(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Vec<Prompt>>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let prompts = state
        .repos
        .prompts
        .list_visible(ctx.user_id(), team.id, PromptType::Upsell)
        .await?;
    Ok(ApiResponse::data(prompts))
}
